//! Parameter override engine.
//!
//! Rewrites outbound API request bodies and headers with an ordered list of
//! declarative operations:
//!
//! - JSON body edits (set, delete, append/prepend, copy/move)
//! - String normalisation (replace, regex replace, trim/ensure affixes, case)
//! - Header edits (set, delete, copy, move) and body/header sync
//! - Pruning of matching objects, e.g. thinking blocks
//! - Early rejection of the request with `return_error`
//!
//! Every operation may be gated on conditions over the body, the request
//! headers and runtime facts such as retry state.
//!
//! ## Configuration Example
//!
//! ```json
//! {
//!   "operations": [
//!     {
//!       "mode": "set",
//!       "path": "temperature",
//!       "value": 0.7,
//!       "conditions": [{"path": "model", "mode": "prefix", "value": "gpt"}],
//!       "logic": "AND"
//!     }
//!   ]
//! }
//! ```
//!
//! A flat object such as `{"temperature": 0}` is a legacy override: each
//! key is set unconditionally.

pub mod agent;
pub mod codec;
pub mod config;
pub mod context;
pub mod matcher;
pub mod path;
pub mod rule;
pub mod transformer;
pub mod validate;

pub use agent::{AgentError, AgentStats, OverrideAgent};
pub use codec::{decode, encode, encode_pretty, DecodeError, ParamOverride};
pub use config::{OperationConfig, RuleSet, Settings};
pub use context::{OverrideContext, RequestParts};
pub use path::{HeaderMap, JsonPath, PathError};
pub use rule::{ApplyReport, RuleEngine};
pub use transformer::{EngineHalt, OperationError};
pub use validate::{validate, ValidationError, ValidationErrors};
