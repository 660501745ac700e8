//! Lossless codec for the MSQ map-block container of Wasteland's game
//! disks.
//!
//! [`framing::scan`] splits a disk file into xor-encrypted blocks;
//! [`map::decode`] turns a map block into an editable [`map::MapBlockTree`]
//! whose parts partition every byte of the block, and [`map::encode`]
//! reproduces the original bytes exactly. [`tree`] converts a block
//! tree to and from an attributed-node form suitable for text editing.

pub mod bits;
pub mod crypto;
pub mod entropy;
pub mod error;
pub mod framing;
pub mod map;
pub mod tree;

pub use error::{Error, Result};
pub use framing::{BlockKind, BlockSpan, FramedFile};
pub use map::MapBlockTree;
pub use tree::TreeNode;
