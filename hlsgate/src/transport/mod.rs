//! Network transports over [`StreamService`](crate::service::StreamService).

pub mod http;
