//! Spriter project (SCML) reading, writing, and document processors.

mod interpolate;
mod read;
mod write;

pub use interpolate::interpolate_keyframes;
pub use read::{read_project, ProjectRead};
pub use write::write_project;

use crate::error::Warning;
use crate::xml::Element;

pub(crate) const MS_PER_SECOND: f32 = 1000.0;

/// Bone flattening is not implemented; the document passes through with a
/// warning so conversions keep going.
// TODO: flatten bone_ref chains into the object transforms instead of
// passing the document through.
pub fn debone(document: Element) -> (Element, Warning) {
    (
        document,
        Warning::new("Deboning is not currently supported."),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debone_passes_document_through() {
        let mut root = Element::new("spriter_data");
        root.set_attr("scml_version", "1.0");
        let (deboned, warning) = debone(root.clone());
        assert_eq!(deboned, root);
        assert_eq!(warning.message, "Deboning is not currently supported.");
    }
}
