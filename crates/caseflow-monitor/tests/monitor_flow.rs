//! End-to-end monitoring flow against the scripted portal.

use caseflow_browser::fake::{
    CodeCheck, FakeDriver, FakePage, FakePageBuilder, FormField, LoginRule,
};
use caseflow_core::{BotConfig, Credentials, SelectionPolicy, SessionState};
use caseflow_monitor::{CaseBot, MonitorError};
use caseflow_vision::ScriptedOcr;
use std::sync::Arc;
use std::time::Duration;

const LOGIN_URL: &str = "https://portal.example.com/login";
const APP_URL: &str = "https://portal.example.com/cases";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn captcha_png() -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(90, 32, image::Rgba([255, 255, 255, 255]));
    let mut buffer = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, image::ImageFormat::Png)
        .expect("encode captcha png");
    buffer.into_inner()
}

fn login_page() -> FakePage {
    FakePageBuilder::new(LOGIN_URL, "Sign In")
        .element(|e| {
            e.selector("input[placeholder*='account']")
                .field(FormField::Username)
        })
        .element(|e| {
            e.selector("input[type='password']")
                .field(FormField::Password)
        })
        .element(|e| e.selector("input[name='captcha']").field(FormField::Code))
        .element(|e| e.selector("canvas").size(90, 32).png(captcha_png()))
        .element(|e| e.selector("button[type='submit']").submit_login())
        .build()
}

fn cases_page(pending: usize) -> FakePage {
    let mut builder = FakePageBuilder::new(APP_URL, "Case Queue")
        .element(|e| e.selector("table tbody").size(800, 400))
        .element(|e| e.selector("button[role='switch']").toggle_switch())
        .element(|e| e.selector("button.ant-btn-primary").confirm_control());
    for _ in 0..pending {
        builder = builder.element(|e| e.selector("input[type='checkbox']").checkbox());
    }
    builder.build()
}

fn portal_driver(pending: usize) -> Arc<FakeDriver> {
    let driver = Arc::new(FakeDriver::with_page(login_page()));
    driver.add_page(cases_page(pending));
    driver.redirect_while_logged_out(APP_URL, LOGIN_URL);
    driver.set_login_rule(LoginRule {
        username: "operator".to_string(),
        password: "secret".to_string(),
        code: CodeCheck::Exact("1234".to_string()),
        app_url: APP_URL.to_string(),
    });
    driver
}

fn fast_config() -> BotConfig {
    let mut config = BotConfig::default();
    config.portal.app_url = APP_URL.to_string();
    config.portal.login_url = LOGIN_URL.to_string();
    config.monitor.page_settle_ms = 0;
    config.monitor.action_settle_ms = 0;
    config.monitor.auth_backoff_secs = 0;
    config.monitor.recovery_sleep_secs = 0;
    config.captcha.capture_settle_ms = 0;
    config.captcha.refresh_settle_ms = 0;
    config.captcha.manual_wait_secs = 1;
    config
}

fn credentials() -> Credentials {
    Credentials::new("operator", "secret").expect("valid credentials")
}

fn bot(driver: Arc<FakeDriver>, config: BotConfig) -> CaseBot {
    CaseBot::new(driver, Arc::new(ScriptedOcr::always("1 2 3 4")), config)
}

#[tokio::test]
async fn test_run_once_authenticates_selects_one_and_confirms() {
    init_tracing();
    let driver = portal_driver(2);
    let bot = bot(driver.clone(), fast_config());

    let confirmed = bot
        .run_once(Some(credentials()))
        .await
        .expect("run one cycle");

    assert!(confirmed);
    assert!(driver.authenticated());
    assert_eq!(driver.login_attempts(), 1);
    assert_eq!(driver.confirm_count(), 1);
    // The confirmed case left the queue, the second one is untouched
    assert_eq!(driver.checked_count(), 0);
}

#[tokio::test]
async fn test_repeated_cycles_drain_the_queue_one_case_at_a_time() {
    let driver = portal_driver(2);
    let bot = bot(driver.clone(), fast_config());

    assert!(bot.run_once(Some(credentials())).await.expect("first cycle"));
    assert!(bot.run_once(Some(credentials())).await.expect("second cycle"));
    // Queue is empty now; an idle cycle is not an error
    assert!(!bot.run_once(Some(credentials())).await.expect("idle cycle"));

    // Login happened exactly once; later cycles found the session valid
    assert_eq!(driver.login_attempts(), 1);
    assert_eq!(driver.confirm_count(), 2);
}

#[tokio::test]
async fn test_select_all_policy_confirms_every_pending_case_in_one_cycle() {
    let driver = portal_driver(3);
    let mut config = fast_config();
    config.monitor.selection_policy = SelectionPolicy::SelectAll;
    let bot = bot(driver.clone(), config);

    assert!(bot.run_once(Some(credentials())).await.expect("cycle"));
    assert_eq!(driver.confirm_count(), 1);
    // Nothing left for the next cycle
    assert!(!bot.run_once(Some(credentials())).await.expect("idle cycle"));
}

#[tokio::test]
async fn test_already_selected_cases_are_a_no_op() {
    let driver = Arc::new(FakeDriver::with_page(login_page()));
    // Both cases are already selected; the cycle must not confirm anything
    let page = FakePageBuilder::new(APP_URL, "Case Queue")
        .element(|e| e.selector("table tbody").size(800, 400))
        .element(|e| e.selector("button.ant-btn-primary").confirm_control())
        .element(|e| e.selector("input[type='checkbox']").checkbox().checked())
        .element(|e| e.selector("input[type='checkbox']").checkbox().checked())
        .build();
    driver.add_page(page);
    driver.redirect_while_logged_out(APP_URL, LOGIN_URL);
    driver.set_login_rule(LoginRule {
        username: "operator".to_string(),
        password: "secret".to_string(),
        code: CodeCheck::Exact("1234".to_string()),
        app_url: APP_URL.to_string(),
    });
    let bot = bot(driver.clone(), fast_config());

    let confirmed = bot.run_once(Some(credentials())).await.expect("cycle");
    assert!(!confirmed);
    assert_eq!(driver.confirm_count(), 0);
}

#[tokio::test]
async fn test_intercepted_confirm_click_falls_back_to_scripted_click() {
    let driver = Arc::new(FakeDriver::with_page(login_page()));
    let page = FakePageBuilder::new(APP_URL, "Case Queue")
        .element(|e| e.selector("table tbody").size(800, 400))
        .element(|e| {
            e.selector("button.ant-btn-primary")
                .confirm_control()
                .click_intercepted()
        })
        .element(|e| e.selector("input[type='checkbox']").checkbox())
        .build();
    driver.add_page(page);
    driver.redirect_while_logged_out(APP_URL, LOGIN_URL);
    driver.set_login_rule(LoginRule {
        username: "operator".to_string(),
        password: "secret".to_string(),
        code: CodeCheck::Exact("1234".to_string()),
        app_url: APP_URL.to_string(),
    });
    let bot = bot(driver.clone(), fast_config());

    let confirmed = bot.run_once(Some(credentials())).await.expect("cycle");
    assert!(confirmed);
    assert_eq!(driver.confirm_count(), 1);
    assert_eq!(driver.forced_click_count(), 1);
}

#[tokio::test]
async fn test_expired_session_without_credentials_backs_off() {
    let driver = portal_driver(1);
    let bot = bot(driver.clone(), fast_config());

    let confirmed = bot.run_once(None).await.expect("cycle without credentials");
    assert!(!confirmed);
    assert_eq!(driver.login_attempts(), 0);
    assert!(!driver.authenticated());
}

#[tokio::test]
async fn test_rejected_login_is_reported_in_status() {
    let driver = portal_driver(1);
    let mut config = fast_config();
    config.monitor.poll_interval_secs = 1;
    // Recognition consistently reads a code the portal will not accept
    let bot = CaseBot::new(driver.clone(), Arc::new(ScriptedOcr::always("9 9 9 9")), config);

    bot.start(credentials()).await.expect("start");
    tokio::time::sleep(Duration::from_millis(200)).await;

    let status = bot.status();
    assert!(status.running);
    assert_eq!(status.session, SessionState::Unauthenticated);
    let error = status.error.expect("rejected login is surfaced as an error");
    assert!(error.contains("authentication failed"));
    assert!(!driver.authenticated());

    bot.stop().await.expect("stop");
}

#[tokio::test]
async fn test_start_publishes_status_and_stop_releases_the_session() {
    let driver = portal_driver(1);
    let mut config = fast_config();
    config.monitor.poll_interval_secs = 1;
    let bot = bot(driver.clone(), config);

    bot.start(credentials()).await.expect("start");
    assert!(matches!(
        bot.start(credentials()).await,
        Err(MonitorError::AlreadyRunning)
    ));

    // Give the first cycle time to complete
    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = bot.status();
    assert!(status.running);
    assert_eq!(status.session, SessionState::Authenticated);
    assert_eq!(status.confirmed_total, 1);
    assert!(status.last_check.is_some());

    bot.stop().await.expect("stop");
    let status = bot.status();
    assert!(!status.running);

    // The driver session is released: further work is refused
    let result = bot.run_once(Some(credentials())).await;
    assert!(result.is_err());

    assert!(matches!(bot.stop().await, Err(MonitorError::NotRunning)));
}
