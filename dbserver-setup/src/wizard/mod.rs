//! Setup wizard navigation state.
//!
//! Plain state (ordered pages, current index, per-page validity) with no UI toolkit attached.
//! A presentation layer subscribes to [`WizardSnapshot`]s and calls the navigation methods;
//! every accepted change notifies all listeners.

use log::info;
use serde::Serialize;
use std::sync::Arc;

use crate::error::WizardError;
use crate::progress::ResultCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Page {
    Welcome,
    License,
    ProductSelection,
    Features,
    ServerConnection,
    Samples,
    Ready,
    Installing,
    Complete,
}

impl Page {
    pub fn id(self) -> &'static str {
        match self {
            Page::Welcome => "welcome",
            Page::License => "license",
            Page::ProductSelection => "product_selection",
            Page::Features => "features",
            Page::ServerConnection => "server_connection",
            Page::Samples => "samples",
            Page::Ready => "ready",
            Page::Installing => "installing",
            Page::Complete => "complete",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Page::Welcome => "Welcome to Database Server Setup",
            Page::License => "License Agreement",
            Page::ProductSelection => "Select Products",
            Page::Features => "Select Features",
            Page::ServerConnection => "Connect to Server",
            Page::Samples => "Sample Databases",
            Page::Ready => "Ready to Install",
            Page::Installing => "Installing",
            Page::Complete => "Completed",
        }
    }

    /// Pages that need user input start out incomplete.
    fn valid_by_default(self) -> bool {
        matches!(
            self,
            Page::Welcome | Page::Features | Page::Samples | Page::Ready | Page::Complete
        )
    }
}

pub const DEFAULT_PAGES: [Page; 9] = [
    Page::Welcome,
    Page::License,
    Page::ProductSelection,
    Page::Features,
    Page::ServerConnection,
    Page::Samples,
    Page::Ready,
    Page::Installing,
    Page::Complete,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WizardSnapshot {
    pub page: Page,
    pub index: usize,
    pub page_count: usize,
    pub can_go_back: bool,
    pub can_go_next: bool,
    pub can_cancel: bool,
    pub next_label: &'static str,
    pub install_result: Option<ResultCode>,
    pub cancelled: bool,
    pub finished: bool,
}

pub type WizardListener = Arc<dyn Fn(&WizardSnapshot) + Send + Sync>;

pub struct WizardState {
    pages: Vec<Page>,
    valid: Vec<bool>,
    index: usize,
    install_result: Option<ResultCode>,
    cancelled: bool,
    finished: bool,
    listeners: Vec<WizardListener>,
}

impl Default for WizardState {
    fn default() -> Self {
        Self::new(DEFAULT_PAGES.to_vec())
    }
}

impl WizardState {
    /// `pages` must be non-empty; an empty list falls back to the default sequence.
    pub fn new(pages: Vec<Page>) -> Self {
        let pages = if pages.is_empty() {
            DEFAULT_PAGES.to_vec()
        } else {
            pages
        };
        let valid = pages.iter().map(|p| p.valid_by_default()).collect();
        Self {
            pages,
            valid,
            index: 0,
            install_result: None,
            cancelled: false,
            finished: false,
            listeners: Vec::new(),
        }
    }

    /// The default sequence without `page` (e.g. no samples were found).
    pub fn without(page: Page) -> Self {
        Self::new(DEFAULT_PAGES.iter().copied().filter(|p| *p != page).collect())
    }

    pub fn subscribe(&mut self, listener: WizardListener) {
        self.listeners.push(listener);
    }

    pub fn current(&self) -> Page {
        self.pages[self.index]
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    fn is_last(&self) -> bool {
        self.index + 1 >= self.pages.len()
    }

    pub fn can_go_back(&self) -> bool {
        self.index > 0
            && !self.cancelled
            && !matches!(self.current(), Page::Installing | Page::Complete)
    }

    pub fn can_go_next(&self) -> bool {
        !self.is_last()
            && !self.cancelled
            && self.current() != Page::Installing
            && self.valid[self.index]
    }

    pub fn can_cancel(&self) -> bool {
        !self.cancelled && !matches!(self.current(), Page::Installing | Page::Complete)
    }

    pub fn next_label(&self) -> &'static str {
        match self.current() {
            Page::Ready => "Install",
            Page::Complete => "Finish",
            _ => "Next",
        }
    }

    pub fn snapshot(&self) -> WizardSnapshot {
        WizardSnapshot {
            page: self.current(),
            index: self.index,
            page_count: self.pages.len(),
            can_go_back: self.can_go_back(),
            can_go_next: self.can_go_next(),
            can_cancel: self.can_cancel(),
            next_label: self.next_label(),
            install_result: self.install_result,
            cancelled: self.cancelled,
            finished: self.finished,
        }
    }

    fn notify(&self) {
        let snap = self.snapshot();
        for l in &self.listeners {
            l(&snap);
        }
    }

    pub fn is_page_valid(&self, page: Page) -> Option<bool> {
        self.pages
            .iter()
            .position(|p| *p == page)
            .map(|i| self.valid[i])
    }

    /// Mark `page` as complete (or not). Listeners hear about actual changes only.
    pub fn set_page_valid(&mut self, page: Page, valid: bool) -> Result<(), WizardError> {
        let i = self
            .pages
            .iter()
            .position(|p| *p == page)
            .ok_or(WizardError::UnknownPage)?;
        if self.valid[i] != valid {
            self.valid[i] = valid;
            self.notify();
        }
        Ok(())
    }

    pub fn next(&mut self) -> Result<Page, WizardError> {
        if self.is_last() {
            return Err(WizardError::AtLastPage);
        }
        if !self.can_go_next() {
            return Err(WizardError::PageIncomplete(self.current().id()));
        }
        self.index += 1;
        info!(
            "[PHASE: wizard] [STEP: navigate] -> {} ({}/{})",
            self.current().id(),
            self.index + 1,
            self.pages.len()
        );
        self.notify();
        Ok(self.current())
    }

    pub fn back(&mut self) -> Result<Page, WizardError> {
        if !self.can_go_back() {
            return Err(WizardError::BackNotAllowed(self.current().id()));
        }
        self.index -= 1;
        info!(
            "[PHASE: wizard] [STEP: navigate] <- {} ({}/{})",
            self.current().id(),
            self.index + 1,
            self.pages.len()
        );
        self.notify();
        Ok(self.current())
    }

    pub fn cancel(&mut self) -> Result<(), WizardError> {
        if !self.can_cancel() {
            return Err(WizardError::CancelNotAllowed(self.current().id()));
        }
        self.cancelled = true;
        info!(
            "[PHASE: wizard] [STEP: cancel] Cancelled on {}",
            self.current().id()
        );
        self.notify();
        Ok(())
    }

    /// Record the install result and leave the installing page.
    pub fn install_finished(&mut self, result: ResultCode) -> Result<Page, WizardError> {
        if self.current() != Page::Installing {
            return Err(WizardError::PageIncomplete(self.current().id()));
        }
        self.install_result = Some(result);
        if !self.is_last() {
            self.index += 1;
        }
        self.notify();
        Ok(self.current())
    }

    /// Close the wizard from the completion page.
    pub fn finish(&mut self) -> Result<(), WizardError> {
        if self.current() != Page::Complete {
            return Err(WizardError::PageIncomplete(self.current().id()));
        }
        self.finished = true;
        self.notify();
        Ok(())
    }
}
