//! Modern offer code redemption presenter and in-memory implementation.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::StoreError;

/// The platform's async offer code redemption sheet.
#[async_trait]
pub trait CodeRedemptionPresenter: Send + Sync {
    async fn present_offer_code_redeem_sheet(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct InMemoryPresenterState {
    presented: usize,
    failure: Option<StoreError>,
}

/// In-memory presenter for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCodeRedemptionPresenter {
    state: Arc<RwLock<InMemoryPresenterState>>,
}

impl InMemoryCodeRedemptionPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryPresenterState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryPresenterState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fails every presentation with `error` until cleared with `None`.
    pub fn set_failure(&self, error: Option<StoreError>) {
        self.write().failure = error;
    }

    /// Returns how many sheets were presented.
    pub fn presented_count(&self) -> usize {
        self.read().presented
    }
}

#[async_trait]
impl CodeRedemptionPresenter for InMemoryCodeRedemptionPresenter {
    async fn present_offer_code_redeem_sheet(&self) -> Result<(), StoreError> {
        let mut state = self.write();
        if let Some(error) = state.failure.clone() {
            return Err(error);
        }
        state.presented += 1;
        Ok(())
    }
}
