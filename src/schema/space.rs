//! Marker types for the two coordinate spaces a box can live in.
//!
//! Documents store [`Normalized`] boxes; the editor and the detectors work in
//! [`Pixel`]s. Converting between them needs the image size, so the types
//! keep the two from mixing silently.

/// Pixels from the top-left corner of the displayed image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Pixel {}

/// Fractions of the image width and height.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Normalized {}
