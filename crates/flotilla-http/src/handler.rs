use async_trait::async_trait;

use crate::context::HttpContext;
use crate::error::HttpError;

/// A handler bound to a path pattern in the [`crate::HttpHandlerRegistry`].
///
/// Handlers run in ascending priority order for every pattern that matches
/// the request path. A handler inspects and mutates the shared
/// [`HttpContext`]; setting [`HttpContext::cancel_next`] stops the chain
/// after it returns.
#[async_trait]
pub trait HttpHandler: Send + Sync + 'static {
    /// Handles one matched request.
    ///
    /// `path` is the normalized request path. An `Err` is logged and does
    /// not stop the chain.
    async fn handle(&self, path: &str, context: &mut HttpContext) -> Result<(), HttpError>;
}
