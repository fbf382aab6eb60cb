//! Criteria compilation and deferred execution
//!
//! - **Criteria**: parsing of criteria objects and find options (`criteria`)
//! - **Compile**: WHERE/SET/VALUES/ORDER BY/LIMIT fragments with bound parameters (`compile`)
//! - **Plan**: statement templates rendered per namespace (`plan`)
//! - **Deferred**: the chainable builder returned by model operations (`deferred`)
//! - **Error Handling**: remapping of known database failures (`error_handling`)
//! - **Value Conversion**: JSON values to and from PostgreSQL types (`value_conversion`)

pub mod compile;
pub mod criteria;
pub mod deferred;
pub mod error_handling;
pub mod plan;
pub(crate) mod value_conversion;

#[doc(inline)]
pub use criteria::{CmpOp, Condition, Criteria, FindOptions};
#[doc(inline)]
pub use deferred::{DeferredQuery, Exec, ExecOne, Many, Mode, One, Raw};
#[doc(inline)]
pub use error_handling::KnownError;
