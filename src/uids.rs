//! Well-known DICOM unique identifiers.
//!
//! This module gathers the UIDs that the negotiation and service layers
//! refer to by name: the application context, the standard transfer
//! syntaxes, and the SOP classes of the supported DIMSE services.
//! The lists are not exhaustive registries,
//! only the closed constant surface that this crate works with.

/// The DICOM application context name,
/// the only application context defined by the standard.
pub const APPLICATION_CONTEXT_NAME: &str = "1.2.840.10008.3.1.1.1";

// --- transfer syntaxes ---

/// Implicit VR Little Endian: the default transfer syntax
pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";

/// Explicit VR Little Endian
pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";

/// Deflated Explicit VR Little Endian
pub const DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1.99";

/// Explicit VR Big Endian (retired)
pub const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";

/// JPEG Baseline (process 1)
pub const JPEG_BASELINE: &str = "1.2.840.10008.1.2.4.50";

/// JPEG Lossless, non-hierarchical, first-order prediction (process 14 SV1)
pub const JPEG_LOSSLESS_SV1: &str = "1.2.840.10008.1.2.4.70";

/// JPEG-LS Lossless
pub const JPEG_LS_LOSSLESS: &str = "1.2.840.10008.1.2.4.80";

/// JPEG 2000 (lossless only)
pub const JPEG_2000_LOSSLESS: &str = "1.2.840.10008.1.2.4.90";

/// JPEG 2000
pub const JPEG_2000: &str = "1.2.840.10008.1.2.4.91";

/// RLE Lossless
pub const RLE_LOSSLESS: &str = "1.2.840.10008.1.2.5";

/// The transfer syntaxes proposed by default
/// when a presentation context does not name any.
pub const DEFAULT_TRANSFER_SYNTAXES: &[&str] =
    &[EXPLICIT_VR_LITTLE_ENDIAN, IMPLICIT_VR_LITTLE_ENDIAN];

// --- SOP classes ---

/// Verification SOP class (C-ECHO)
pub const VERIFICATION: &str = "1.2.840.10008.1.1";

/// Storage Commitment Push Model SOP class
pub const STORAGE_COMMITMENT_PUSH_MODEL: &str = "1.2.840.10008.1.20.1";

/// Modality Performed Procedure Step SOP class
pub const MODALITY_PERFORMED_PROCEDURE_STEP: &str = "1.2.840.10008.3.1.2.3.3";

/// Modality Worklist Information Model - FIND
pub const MODALITY_WORKLIST_FIND: &str = "1.2.840.10008.5.1.4.31";

/// Patient Root Query/Retrieve Information Model - FIND
pub const PATIENT_ROOT_QR_FIND: &str = "1.2.840.10008.5.1.4.1.2.1.1";

/// Patient Root Query/Retrieve Information Model - MOVE
pub const PATIENT_ROOT_QR_MOVE: &str = "1.2.840.10008.5.1.4.1.2.1.2";

/// Patient Root Query/Retrieve Information Model - GET
pub const PATIENT_ROOT_QR_GET: &str = "1.2.840.10008.5.1.4.1.2.1.3";

/// Study Root Query/Retrieve Information Model - FIND
pub const STUDY_ROOT_QR_FIND: &str = "1.2.840.10008.5.1.4.1.2.2.1";

/// Study Root Query/Retrieve Information Model - MOVE
pub const STUDY_ROOT_QR_MOVE: &str = "1.2.840.10008.5.1.4.1.2.2.2";

/// Study Root Query/Retrieve Information Model - GET
pub const STUDY_ROOT_QR_GET: &str = "1.2.840.10008.5.1.4.1.2.2.3";

// --- storage classes ---

/// Computed Radiography Image Storage
pub const COMPUTED_RADIOGRAPHY_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.1";

/// Digital X-Ray Image Storage - for presentation
pub const DIGITAL_X_RAY_IMAGE_STORAGE_FOR_PRESENTATION: &str = "1.2.840.10008.5.1.4.1.1.1.1";

/// Digital Mammography X-Ray Image Storage - for presentation
pub const DIGITAL_MAMMOGRAPHY_X_RAY_IMAGE_STORAGE_FOR_PRESENTATION: &str =
    "1.2.840.10008.5.1.4.1.1.1.2";

/// CT Image Storage
pub const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";

/// Ultrasound Image Storage
pub const ULTRASOUND_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.6.1";

/// Secondary Capture Image Storage
pub const SECONDARY_CAPTURE_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.7";

/// MR Image Storage
pub const MR_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.4";

/// Enhanced MR Image Storage
pub const ENHANCED_MR_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.4.1";

/// Positron Emission Tomography Image Storage
pub const PET_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.128";

/// The storage SOP classes known to this crate.
pub const STORAGE_CLASSES: &[&str] = &[
    COMPUTED_RADIOGRAPHY_IMAGE_STORAGE,
    DIGITAL_X_RAY_IMAGE_STORAGE_FOR_PRESENTATION,
    DIGITAL_MAMMOGRAPHY_X_RAY_IMAGE_STORAGE_FOR_PRESENTATION,
    CT_IMAGE_STORAGE,
    MR_IMAGE_STORAGE,
    ENHANCED_MR_IMAGE_STORAGE,
    ULTRASOUND_IMAGE_STORAGE,
    SECONDARY_CAPTURE_IMAGE_STORAGE,
    PET_IMAGE_STORAGE,
];

/// Whether the given UID refers to one of the known storage SOP classes.
pub fn is_storage_class(sop_class_uid: &str) -> bool {
    STORAGE_CLASSES.contains(&sop_class_uid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_class_lookup() {
        assert!(is_storage_class(CT_IMAGE_STORAGE));
        assert!(!is_storage_class(VERIFICATION));
        assert!(!is_storage_class(IMPLICIT_VR_LITTLE_ENDIAN));
    }
}
