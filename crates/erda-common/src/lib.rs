//! Common types for the Erda platform operator: CRDs, errors, and the
//! label/annotation contract shared by every emitted primitive.

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod labels;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager name used for every server-side apply issued by the operator
pub const FIELD_MANAGER: &str = "erda-operator";

/// Default CRD group; overridable via [`labels::ENV_CRD_GROUP`]
pub const DEFAULT_CRD_GROUP: &str = "erda.terminus.io";

/// CRD version served and stored by the operator
pub const CRD_VERSION: &str = "v1beta1";
