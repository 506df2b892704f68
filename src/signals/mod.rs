//! Push-based reactive values.
//!
//! - [`Signal`]: a value cell with a subscriber set. Writing notifies
//!   subscribers only when the new value differs from the current one.
//! - [`Derived`]: a value computed from other signals. Its dependency set is
//!   discovered on every recomputation through an explicit [`Tracker`], so
//!   conditionally read dependencies are picked up and dropped correctly.
//!
//! # Example
//!
//! ```ignore
//! let a = Signal::new(1);
//! let b = Signal::new(2);
//! let (a2, b2) = (a.clone(), b.clone());
//! let sum = Derived::new(move |t| t.get(&a2) + t.get(&b2));
//!
//! a.set(4);
//! assert_eq!(sum.get(), 6);
//! ```

mod derived;
mod propagation;
mod signal;

pub use derived::{Derived, Tracker};
pub use signal::{Readable, Signal, Subscription};
