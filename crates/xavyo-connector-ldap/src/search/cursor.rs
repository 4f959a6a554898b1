//! Scoped ownership of a search cursor.

use ldap3::{LdapError, LdapResult};
use tracing::debug;

use crate::transport::{SearchCursor, SearchResponse};

/// Owns a cursor for the duration of one pass.
///
/// Every exit path ends the protocol operation: [`close`](Self::close)
/// abandons only if the operation is still in flight, [`abandon`](Self::abandon)
/// cancels it outright, and dropping the guard without either issues a
/// non-blocking cancel.
pub struct CursorGuard<C: SearchCursor> {
    cursor: Option<C>,
}

impl<C: SearchCursor> CursorGuard<C> {
    pub fn new(cursor: C) -> Self {
        Self {
            cursor: Some(cursor),
        }
    }

    /// Advance the cursor.
    pub async fn next(&mut self) -> Result<Option<SearchResponse>, LdapError> {
        match self.cursor.as_mut() {
            Some(cursor) => cursor.next().await,
            None => Ok(None),
        }
    }

    /// Read the terminal result frame, completing the operation.
    pub async fn finish(&mut self) -> Option<LdapResult> {
        match self.cursor.as_mut() {
            Some(cursor) => cursor.search_done().await,
            None => None,
        }
    }

    /// Release the cursor, abandoning the operation only if it is incomplete.
    pub async fn close(mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            if !cursor.is_done() {
                debug!("Closing incomplete cursor, abandoning operation");
                abandon_logged(&mut cursor).await;
            }
        }
    }

    /// Cancel the operation and release the cursor.
    pub async fn abandon(mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            abandon_logged(&mut cursor).await;
        }
    }
}

async fn abandon_logged<C: SearchCursor>(cursor: &mut C) {
    if let Err(e) = cursor.abandon().await {
        debug!(error = %e, "Abandon failed");
    }
}

impl<C: SearchCursor> Drop for CursorGuard<C> {
    fn drop(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            if !cursor.is_done() {
                cursor.cancel();
            }
        }
    }
}
