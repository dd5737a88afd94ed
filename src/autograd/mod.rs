//! Reverse-mode automatic differentiation.
//!
//! Graph construction happens in [`apply_forward`], which wraps an
//! [`Operation`]'s forward pass and attaches a shared [`BackProp`] record to
//! every output it produces. Gradient propagation happens in the work-list
//! traversal started by [`crate::variable::Variable::backward`], which
//! delivers gradients into record slots until each record's fan-in is
//! complete and it fires. [`no_grad`] and friends control whether any of
//! this recording happens at all.

pub mod apply;
pub mod backprop;
pub mod grad_check;
pub mod grad_mode;

pub use apply::{apply_forward, Operation};
pub use backprop::{BackProp, BackwardFn};
pub use grad_check::{check_grad, GradCheckError};
pub use grad_mode::{
    enable_grad, is_grad_enabled, no_grad, set_grad_enabled, EnableGradGuard, NoGradGuard,
};

pub(crate) use backprop::run_backward;
