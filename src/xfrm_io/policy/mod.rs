// SPDX-License-Identifier: MIT

mod delete;
pub use delete::*;

mod flush;
pub use flush::*;

mod get;
pub use get::*;

mod handle;
pub use handle::*;

mod modify;
pub use modify::*;

mod spdinfo;
pub use spdinfo::*;
