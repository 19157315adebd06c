//! ICY metadata injection for PMOIcyProxy
//!
//! Players that send `Icy-Metadata: 1` expect the audio stream to be
//! interrupted every `icy-metaint` bytes by a short text block carrying the
//! current title. Many origins never provide those blocks; this crate
//! synthesises them.
//!
//! # Components
//!
//! - [`block`]: encoding of a title into a wire-format metadata block
//! - [`IcyInjector`]: `AsyncRead` adapter interleaving blocks into audio
//! - [`TitleTemplate`]: `{{ .field }}` templates rendered from JSON documents
//! - [`TitleRefresher`]: cancellable task polling a [`TitleSource`] and
//!   publishing titles through a [`TitleHandle`]
//!
//! # Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use pmoicy::{IcyInjector, JsonTitleSource, TitleRefresher};
//! use tokio::io::AsyncReadExt;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let upstream: &[u8] = &[0u8; 64_000];
//! let mut injector = IcyInjector::new(upstream, "Radio");
//!
//! let source = JsonTitleSource::with_format(
//!     reqwest::Client::new(),
//!     "http://example.com/now_playing.json".parse()?,
//!     "{{ .artist }} - {{ .title }}",
//! )?;
//! let refresher = TitleRefresher::new(Arc::new(source))
//!     .with_interval(Duration::from_secs(10))
//!     .spawn(injector.title_handle(), CancellationToken::new());
//!
//! let mut buf = vec![0u8; 8192];
//! while injector.read(&mut buf).await? > 0 {}
//!
//! refresher.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod block;
pub mod error;
pub mod injector;
pub mod refresher;
pub mod template;

pub use block::{encode_icy_block, MAX_TITLE_LEN};
pub use error::{IcyError, Result};
pub use injector::{IcyInjector, TitleHandle, DEFAULT_METAINT};
pub use refresher::{
    JsonTitleSource, RefresherHandle, RefresherState, TitleRefresher, TitleSource,
    DEFAULT_REFRESH_INTERVAL,
};
pub use template::{TemplateError, TitleTemplate};
