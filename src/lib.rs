// SPDX-License-Identifier: MIT OR Apache-2.0

mod catalog;
mod device;
mod dpb;
mod instance;
mod output_pool;
mod types;
mod video;

pub use catalog::*;
pub use device::*;
pub use dpb::*;
pub use instance::*;
pub use output_pool::*;
pub use types::*;
pub use video::*;
