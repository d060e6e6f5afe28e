//! Pure predicates over strings and maps: path, header, fraction, and
//! hostname matching (section 4.A). Nothing here owns state or talks to
//! the xDS layer — every function is a deterministic function of its
//! inputs (plus, for fraction matching, an injected RNG closure so tests
//! can pin outcomes).

pub mod fraction;
pub mod header;
pub mod hostname;
pub mod path;

pub use fraction::FractionMatcher;
pub use header::{HeaderIndex, HeaderMatch, HeaderMatcherKind};
pub use hostname::{match_hostname, select_virtual_host};
pub use path::PathMatcher;
