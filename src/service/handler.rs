//! Inbound application frames.
//!
//! A `message` frame whose id matches no outstanding local request is a
//! request from the peer. It is handed to the [`InboundHandler`] supplied by
//! the embedding process, which answers with [`Connection::reply`] when a
//! reply is due. On the initiating side `initialize` frames take the same
//! path.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

use crate::error::Result;
use crate::protocol::message::Response;
use crate::service::connection::Connection;

pub trait InboundHandler: Send + Sync + 'static {
    fn handle(&self, connection: Arc<Connection>, frame: Response) -> BoxFuture<'static, Result<()>>;
}

impl<F, Fut> InboundHandler for F
where
    F: Fn(Arc<Connection>, Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn handle(&self, connection: Arc<Connection>, frame: Response) -> BoxFuture<'static, Result<()>> {
        Box::pin(self(connection, frame))
    }
}
