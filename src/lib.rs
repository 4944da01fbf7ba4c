//! kanimate - Library for converting Klei animation data (kanim) to and from
//! Spriter projects (scml)
//!
//! This library provides functionality to:
//! - Decode and encode the kanim binary triple (build, anim, texture atlas)
//! - Read and write Spriter SCML projects with loose sprites
//! - Repack sprite atlases and rebuild animations onto a uniform keyframe grid
//! - Support both lenient and strict error modes

pub mod atlas;
pub mod cli;
pub mod convert;
pub mod error;
pub mod kanim;
pub mod model;
pub mod names;
pub mod scml;
pub mod xml;
