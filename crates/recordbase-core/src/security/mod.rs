//! Access control for recordbase.
//!
//! Abilities are resolved per request from data-defined role lists:
//! - structural grants on the resource or form definition
//! - record-scoped grants, each an OR of access conditions bound to the
//!   user's position attributes
//! - field-level read and update grants
//!
//! # Example
//!
//! ```ignore
//! use recordbase_core::security::{AbilityResolver, Action, FieldProjector, Subject, User};
//!
//! let directory = catalog.role_directory()?;
//! let ability = AbilityResolver::new(&directory).for_resource(&user, &resource);
//!
//! if ability.can(Action::Read, Subject::Records) {
//!     let visible = FieldProjector::project(&record, &ability);
//! }
//! ```

mod ability;
mod projector;
mod resolver;
mod user;

pub use ability::{Ability, Action, RecordAccess, Subject};
pub use projector::FieldProjector;
pub use resolver::AbilityResolver;
pub use user::{Author, PositionAttribute, User};
