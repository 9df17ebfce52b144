//! CAPTCHA resolution orchestration.
//!
//! Locates the code graphic, captures it, runs every preprocessing variant
//! through both extraction modes, and keeps the best candidate. A failed
//! attempt refreshes the graphic and retries inside a fixed budget before
//! falling through to the manual-entry port.

use crate::error::{CaptchaError, Result};
use crate::manual::ManualCodeProvider;
use caseflow_browser::{Driver, ElementLocator, UiRole};
use caseflow_core::CaptchaConfig;
use caseflow_vision::extract::{segmented, whole_image};
use caseflow_vision::preprocess::{variants, VariantKind};
use caseflow_vision::{whole_image_confidence, OcrEngine, RecognitionCandidate};
use image::RgbaImage;
use std::sync::Arc;

/// Resolves the login CAPTCHA to a digit string.
pub struct CaptchaResolver {
    driver: Arc<dyn Driver>,
    locator: Arc<ElementLocator>,
    engine: Arc<dyn OcrEngine>,
    manual: Option<Arc<dyn ManualCodeProvider>>,
    config: CaptchaConfig,
}

impl CaptchaResolver {
    /// Resolver over a driver, locator and OCR engine.
    #[must_use]
    pub fn new(
        driver: Arc<dyn Driver>,
        locator: Arc<ElementLocator>,
        engine: Arc<dyn OcrEngine>,
        config: CaptchaConfig,
    ) -> Self {
        Self {
            driver,
            locator,
            engine,
            manual: None,
            config,
        }
    }

    /// Attach the manual-entry port used after the retry budget runs out.
    #[must_use]
    pub fn with_manual_fallback(mut self, provider: Arc<dyn ManualCodeProvider>) -> Self {
        self.manual = Some(provider);
        self
    }

    /// One full resolution pass over the currently displayed graphic.
    ///
    /// The returned string always has exactly the configured code length;
    /// `None` means every strategy came up empty.
    pub async fn resolve(&self) -> Result<Option<String>> {
        let element = match self.locator.locate(UiRole::CaptchaImage, None).await {
            Ok(element) => element,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                tracing::debug!(error = %e, "captcha graphic not located");
                return Ok(None);
            }
        };

        self.driver.scroll_into_view(element).await?;
        tokio::time::sleep(self.config.capture_settle()).await;

        let png = self.driver.screenshot(element).await?;
        let captured = match image::load_from_memory(&png) {
            Ok(decoded) => decoded.to_rgba8(),
            Err(e) => {
                tracing::warn!(error = %e, bytes = png.len(), "captured graphic did not decode");
                return Ok(None);
            }
        };
        tracing::debug!(
            width = captured.width(),
            height = captured.height(),
            "captured captcha graphic"
        );

        Ok(self.recognize(&captured).await)
    }

    /// Run the recognition strategies over one captured image.
    async fn recognize(&self, captured: &RgbaImage) -> Option<String> {
        let required = self.config.code_length;
        let mut best: Option<RecognitionCandidate> = None;

        for variant in variants(captured) {
            match &variant.kind {
                VariantKind::Whole(rendering) => {
                    if let Some(digits) =
                        whole_image(self.engine.as_ref(), rendering, required).await
                    {
                        // An exact-length hit from a whole-image family carries
                        // the fixed confidence baseline, which later families
                        // cannot beat, so stop here. All whole-image families
                        // run before the segmentation family.
                        let candidate = RecognitionCandidate {
                            strategy: variant.strategy,
                            digits,
                            confidence: whole_image_confidence(required),
                        };
                        tracing::info!(
                            strategy = candidate.strategy.label(),
                            confidence = candidate.confidence,
                            "captcha recognized"
                        );
                        return Some(candidate.digits);
                    }
                }
                VariantKind::Digits(cells) => {
                    if let Some((digits, confidence)) =
                        segmented(self.engine.as_ref(), cells, required).await
                    {
                        let candidate = RecognitionCandidate {
                            strategy: variant.strategy,
                            digits,
                            confidence,
                        };
                        if best
                            .as_ref()
                            .map_or(true, |b| candidate.confidence > b.confidence)
                        {
                            best = Some(candidate);
                        }
                    }
                }
            }
        }

        match best {
            Some(candidate) => {
                tracing::info!(
                    strategy = candidate.strategy.label(),
                    confidence = candidate.confidence,
                    "captcha recognized from segmented digits"
                );
                Some(candidate.digits)
            }
            None => None,
        }
    }

    /// Resolve inside the configured retry budget, refreshing the graphic
    /// before every retry.
    pub async fn resolve_with_retries(&self) -> Result<Option<String>> {
        let attempts = self.config.max_attempts;
        for attempt in 1..=attempts {
            tracing::info!(attempt, attempts, "reading captcha");
            if let Some(code) = self.resolve().await? {
                return Ok(Some(code));
            }
            tracing::warn!(attempt, "captcha attempt failed");
            if attempt < attempts {
                self.refresh().await?;
            }
        }
        Ok(None)
    }

    /// Resolve with retries, then fall through to the manual-entry port.
    pub async fn obtain_code(&self) -> Result<String> {
        if let Some(code) = self.resolve_with_retries().await? {
            return Ok(code);
        }

        let Some(provider) = self.manual.as_ref() else {
            tracing::error!("captcha exhausted and no manual-entry port attached");
            return Err(CaptchaError::Exhausted {
                attempts: self.config.max_attempts,
            });
        };

        tracing::warn!(
            wait_secs = self.config.manual_wait_secs,
            "captcha exhausted, waiting for manual code entry"
        );
        let code = provider
            .provide(self.config.manual_wait())
            .await
            .ok_or(CaptchaError::ManualCodeUnavailable)?;

        let code = code.trim().to_string();
        if code.len() < self.config.manual_min_length {
            return Err(CaptchaError::ManualCodeRejected(format!(
                "need at least {} characters, got {}",
                self.config.manual_min_length,
                code.len()
            )));
        }
        tracing::info!("using manually supplied code");
        Ok(code)
    }

    /// Redraw the graphic: click the refresh control when one exists,
    /// otherwise reload the whole page, then let the page settle.
    async fn refresh(&self) -> Result<()> {
        match self.locator.locate(UiRole::CaptchaRefresh, None).await {
            Ok(control) => {
                tracing::debug!("refreshing captcha via refresh control");
                self.driver.click(control).await?;
            }
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(_) => {
                tracing::debug!("no refresh control, reloading page");
                self.driver.reload().await?;
            }
        }
        tokio::time::sleep(self.config.refresh_settle()).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manual::CodeSlot;
    use caseflow_browser::fake::{FakeDriver, FakePageBuilder};
    use caseflow_vision::ScriptedOcr;
    use image::Rgba;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    fn captcha_png() -> Vec<u8> {
        let mut image = RgbaImage::from_pixel(140, 40, Rgba([255, 255, 255, 255]));
        for i in 0..4u32 {
            #[allow(clippy::cast_possible_wrap)]
            let x = (10 + i * 32) as i32;
            draw_filled_rect_mut(&mut image, Rect::at(x, 8).of_size(12, 22), Rgba([0, 0, 0, 255]));
        }
        let mut buffer = std::io::Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, image::ImageFormat::Png)
            .expect("encode captcha png");
        buffer.into_inner()
    }

    fn login_page(with_refresh: bool) -> caseflow_browser::fake::FakePage {
        let builder = FakePageBuilder::new("https://portal.example.com/login", "Sign In")
            .element(|e| e.selector("canvas").size(90, 32).png(captcha_png()));
        let builder = if with_refresh {
            builder.element(|e| e.selector("button[class*='refresh']").refresh_control())
        } else {
            builder
        };
        builder.build()
    }

    fn resolver(
        driver: Arc<FakeDriver>,
        engine: Arc<dyn OcrEngine>,
        config: CaptchaConfig,
    ) -> CaptchaResolver {
        let locator = Arc::new(ElementLocator::new(driver.clone()));
        CaptchaResolver::new(driver, locator, engine, config)
    }

    fn fast_config() -> CaptchaConfig {
        CaptchaConfig {
            capture_settle_ms: 0,
            refresh_settle_ms: 0,
            manual_wait_secs: 1,
            ..CaptchaConfig::default()
        }
    }

    #[tokio::test]
    async fn test_resolve_returns_exact_length_code() {
        let driver = Arc::new(FakeDriver::with_page(login_page(true)));
        let resolver = resolver(driver, Arc::new(ScriptedOcr::always("1 2 3 4")), fast_config());

        let code = resolver.resolve().await.expect("resolve");
        assert_eq!(code.as_deref(), Some("1234"));
    }

    #[tokio::test]
    async fn test_resolve_never_returns_wrong_length() {
        // Three digits everywhere: whole-image passes reject it, and each
        // segmented cell sees three digits instead of one
        let driver = Arc::new(FakeDriver::with_page(login_page(true)));
        let resolver = resolver(driver, Arc::new(ScriptedOcr::always("123")), fast_config());

        let code = resolver.resolve().await.expect("resolve");
        assert_eq!(code, None);
    }

    #[tokio::test]
    async fn test_exhaustion_refreshes_once_per_retry_then_stops() {
        let driver = Arc::new(FakeDriver::with_page(login_page(true)));
        let resolver = resolver(
            driver.clone(),
            Arc::new(ScriptedOcr::failing()),
            fast_config(),
        );

        let code = resolver.resolve_with_retries().await.expect("retries");
        assert_eq!(code, None);
        // Three attempts, a refresh before each of the two retries
        assert_eq!(driver.refresh_count(), 2);
        assert_eq!(driver.reload_count(), 0);
    }

    #[tokio::test]
    async fn test_refresh_falls_back_to_reload_without_a_control() {
        let driver = Arc::new(FakeDriver::with_page(login_page(false)));
        let resolver = resolver(
            driver.clone(),
            Arc::new(ScriptedOcr::failing()),
            fast_config(),
        );

        let code = resolver.resolve_with_retries().await.expect("retries");
        assert_eq!(code, None);
        assert_eq!(driver.refresh_count(), 0);
        assert_eq!(driver.reload_count(), 2);
    }

    #[tokio::test]
    async fn test_obtain_code_falls_through_to_manual_entry() {
        let driver = Arc::new(FakeDriver::with_page(login_page(true)));
        let slot = CodeSlot::new();
        slot.offer("777").await;
        let resolver = resolver(
            driver,
            Arc::new(ScriptedOcr::failing()),
            fast_config(),
        )
        .with_manual_fallback(slot);

        let code = resolver.obtain_code().await.expect("manual fallback");
        assert_eq!(code, "777");
    }

    #[tokio::test]
    async fn test_short_manual_codes_are_rejected() {
        let driver = Arc::new(FakeDriver::with_page(login_page(true)));
        let slot = CodeSlot::new();
        slot.offer("12").await;
        let resolver = resolver(
            driver,
            Arc::new(ScriptedOcr::failing()),
            fast_config(),
        )
        .with_manual_fallback(slot);

        let result = resolver.obtain_code().await;
        assert!(matches!(result, Err(CaptchaError::ManualCodeRejected(_))));
    }

    #[tokio::test]
    async fn test_missing_manual_port_reports_exhaustion() {
        let driver = Arc::new(FakeDriver::with_page(login_page(true)));
        let resolver = resolver(driver, Arc::new(ScriptedOcr::failing()), fast_config());

        let result = resolver.obtain_code().await;
        assert!(matches!(
            result,
            Err(CaptchaError::Exhausted { attempts: 3 })
        ));
    }
}
