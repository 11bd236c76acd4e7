//! Offer code redemption sheet routing.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::services::code_presenter::CodeRedemptionPresenter;
use crate::services::payment_queue::PaymentQueue;

/// First OS major version with the async redemption presenter.
pub const MODERN_REDEMPTION_SHEET_MIN_OS: u32 = 16;

/// Facts about the running platform that affect sheet selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub os_major_version: u32,
    /// Phone apps running on a desktop host cannot show the sheet.
    pub is_mobile_app_on_desktop: bool,
}

impl Default for PlatformInfo {
    fn default() -> Self {
        Self {
            os_major_version: MODERN_REDEMPTION_SHEET_MIN_OS,
            is_mobile_app_on_desktop: false,
        }
    }
}

/// Which sheet, if any, was shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionSheet {
    Skipped,
    Legacy,
    Modern,
}

pub struct CodeRedemptionRouter<Q: PaymentQueue, P: CodeRedemptionPresenter> {
    platform: PlatformInfo,
    queue: Q,
    presenter: P,
}

impl<Q: PaymentQueue, P: CodeRedemptionPresenter> CodeRedemptionRouter<Q, P> {
    pub fn new(platform: PlatformInfo, queue: Q, presenter: P) -> Self {
        Self {
            platform,
            queue,
            presenter,
        }
    }

    /// Shows the offer code redemption sheet appropriate for the platform.
    ///
    /// Redeemed codes arrive later as ordinary transactions on whichever
    /// source is active.
    #[tracing::instrument(skip(self), fields(os = self.platform.os_major_version))]
    pub async fn present_code_redemption_sheet(&self) -> Result<RedemptionSheet, StoreError> {
        let sheet = if self.platform.is_mobile_app_on_desktop {
            tracing::warn!("offer code redemption is unavailable for mobile apps on desktop");
            RedemptionSheet::Skipped
        } else if self.platform.os_major_version < MODERN_REDEMPTION_SHEET_MIN_OS {
            self.queue.present_code_redemption_sheet();
            RedemptionSheet::Legacy
        } else {
            self.presenter.present_offer_code_redeem_sheet().await?;
            RedemptionSheet::Modern
        };

        metrics::counter!("code_redemption_sheets_total", "sheet" => sheet_label(sheet))
            .increment(1);
        Ok(sheet)
    }
}

fn sheet_label(sheet: RedemptionSheet) -> &'static str {
    match sheet {
        RedemptionSheet::Skipped => "skipped",
        RedemptionSheet::Legacy => "legacy",
        RedemptionSheet::Modern => "modern",
    }
}
