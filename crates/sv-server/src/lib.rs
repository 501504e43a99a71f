//! StreamView Server
//!
//! Accepts camera poses from remote viewers, renders the scene from those
//! poses and streams the encoded frames back.
//!
//! # Module Structure
//!
//! ```text
//! sv-server/
//! ├── config.rs        # ServerConfig (RON file + environment overlay)
//! ├── encoding/        # Raw, tagged numeric array, PNG and media frame codecs
//! ├── session.rs       # Per-connection state and rate limiting
//! ├── pipeline.rs      # RenderPipeline shared by all transports
//! ├── transport/       # Event, interval and stream delivery + WebSocket endpoint
//! └── server.rs        # StreamServer assembly
//! ```

pub mod config;
pub mod encoding;
pub mod pipeline;
pub mod server;
pub mod session;
pub mod transport;

pub use config::{ConfigError, EnvSource, MapEnv, ProcessEnv, ServerConfig};
pub use encoding::{EncodeError, EncodingFormat, FrameEncoder, MediaFrame};
pub use pipeline::{PipelineError, RenderPipeline};
pub use server::{StreamServer, load_asset};
pub use session::{PoseDecision, Session, SessionError, SessionRegistry, StereoMode};
pub use transport::{EventHandler, EventOutcome, TransportMode};
