//! A reverse-mode automatic differentiation engine over dynamically built
//! computation graphs.
//!
//! Typed [`Variable`] nodes wrap shared storage on a [`StorageDevice`];
//! operations are lifted into the graph through
//! [`apply_forward`](autograd::apply_forward), which records type-erased
//! [`BackProp`](autograd::BackProp) edges; calling
//! [`Variable::backward`] propagates gradients back to every tracked leaf.

pub mod autograd;
pub mod buffer;
pub mod device;
pub mod error;
pub mod ops;
pub mod types;
pub mod utils;
pub mod variable;

pub use autograd::{
    apply_forward, check_grad, enable_grad, is_grad_enabled, no_grad, set_grad_enabled,
    BackProp, GradCheckError, Operation,
};
pub use buffer::Buffer;
pub use device::StorageDevice;
pub use error::RetrogradError;
pub use types::{DType, Element};
pub use variable::untyped::UntypedVariable;
pub use variable::{from_vec, full, full_like, ones, ones_like, randn, zeros, zeros_like, Variable};

// Re-export traits required by public functions/structs.
pub use num_traits;
