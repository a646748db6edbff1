//! Round-trip tests for the PDU codec.

use dicom_dimse::pdu::{
    read_pdu, write_pdu, AbortRQServiceProviderReason, AbortRQSource, AssociationAC,
    AssociationRJ, AssociationRJResult, AssociationRJServiceUserReason, AssociationRJSource,
    AssociationRQ, PDataValue, PDataValueType, Pdu, PresentationContextProposed,
    PresentationContextResult, PresentationContextResultReason, UserIdentity, UserIdentityType,
    UserVariableItem, DEFAULT_MAX_PDU, MINIMUM_PDU_SIZE,
};
use matches::assert_matches;

fn round_trip(pdu: Pdu) -> Pdu {
    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &pdu).expect("encoding must succeed");
    let decoded = read_pdu(&mut bytes.as_slice(), DEFAULT_MAX_PDU, true)
        .expect("decoding must succeed")
        .expect("a full PDU was provided");
    decoded
}

#[test]
fn association_rq_round_trip() {
    let pdu = Pdu::AssociationRQ(AssociationRQ {
        protocol_version: 1,
        calling_ae_title: "STORE-SCU".to_string(),
        called_ae_title: "MAIN-STORAGE".to_string(),
        application_context_name: "1.2.840.10008.3.1.1.1".to_string(),
        presentation_contexts: vec![
            PresentationContextProposed {
                id: 1,
                abstract_syntax: "1.2.840.10008.1.1".to_string(),
                transfer_syntaxes: vec![
                    "1.2.840.10008.1.2.1".to_string(),
                    "1.2.840.10008.1.2".to_string(),
                ],
            },
            PresentationContextProposed {
                id: 3,
                abstract_syntax: "1.2.840.10008.5.1.4.1.1.2".to_string(),
                transfer_syntaxes: vec!["1.2.840.10008.1.2".to_string()],
            },
        ],
        user_variables: vec![
            UserVariableItem::MaxLength(16_384),
            UserVariableItem::ImplementationClassUID("2.25.137".to_string()),
            UserVariableItem::ImplementationVersionName("TEST 1.0".to_string()),
            UserVariableItem::AsynchronousOperationsWindow {
                max_operations_invoked: 2,
                max_operations_performed: 1,
            },
            UserVariableItem::UserIdentityItem(UserIdentity::new(
                true,
                UserIdentityType::UsernamePassword,
                b"operator".to_vec(),
                b"secret".to_vec(),
            )),
        ],
    });

    assert_eq!(round_trip(pdu.clone()), pdu);
}

#[test]
fn association_ac_round_trip() {
    let pdu = Pdu::AssociationAC(AssociationAC {
        protocol_version: 1,
        calling_ae_title: "STORE-SCU".to_string(),
        called_ae_title: "MAIN-STORAGE".to_string(),
        application_context_name: "1.2.840.10008.3.1.1.1".to_string(),
        presentation_contexts: vec![
            PresentationContextResult {
                id: 1,
                reason: PresentationContextResultReason::Acceptance,
                transfer_syntax: "1.2.840.10008.1.2.1".to_string(),
            },
            PresentationContextResult {
                id: 3,
                reason: PresentationContextResultReason::AbstractSyntaxNotSupported,
                transfer_syntax: "1.2.840.10008.1.2".to_string(),
            },
        ],
        user_variables: vec![
            UserVariableItem::MaxLength(32_768),
            UserVariableItem::UserIdentityServerResponse(b"ticket".to_vec()),
        ],
    });

    assert_eq!(round_trip(pdu.clone()), pdu);
}

#[test]
fn association_rj_round_trip() {
    let pdu = Pdu::AssociationRJ(AssociationRJ {
        result: AssociationRJResult::Permanent,
        source: AssociationRJSource::ServiceUser(
            AssociationRJServiceUserReason::CalledAeTitleNotRecognized,
        ),
    });

    assert_eq!(round_trip(pdu.clone()), pdu);
}

#[test]
fn pdata_round_trip() {
    let pdu = Pdu::PData {
        data: vec![
            PDataValue {
                presentation_context_id: 1,
                value_type: PDataValueType::Command,
                is_last: true,
                data: vec![0x11; 64],
            },
            PDataValue {
                presentation_context_id: 1,
                value_type: PDataValueType::Data,
                is_last: false,
                data: vec![0x22; 128],
            },
        ],
    };

    assert_eq!(round_trip(pdu.clone()), pdu);
}

#[test]
fn release_and_abort_round_trips() {
    assert_eq!(round_trip(Pdu::ReleaseRQ), Pdu::ReleaseRQ);
    assert_eq!(round_trip(Pdu::ReleaseRP), Pdu::ReleaseRP);

    let abort = Pdu::AbortRQ {
        source: AbortRQSource::ServiceProvider(AbortRQServiceProviderReason::UnexpectedPdu),
    };
    assert_eq!(round_trip(abort.clone()), abort);
}

#[test]
fn unrecognized_pdu_type_is_preserved() {
    let pdu = Pdu::Unknown {
        pdu_type: 0xAA,
        data: vec![1, 2, 3, 4],
    };
    assert_eq!(round_trip(pdu.clone()), pdu);
}

#[test]
fn strict_mode_rejects_oversized_pdus() {
    let pdu = Pdu::PData {
        data: vec![PDataValue {
            presentation_context_id: 1,
            value_type: PDataValueType::Data,
            is_last: true,
            data: vec![0; MINIMUM_PDU_SIZE as usize * 2],
        }],
    };
    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &pdu).unwrap();

    let outcome = read_pdu(&mut bytes.as_slice(), MINIMUM_PDU_SIZE, true);
    assert_matches!(
        outcome,
        Err(dicom_dimse::pdu::reader::Error::PduTooLarge { .. })
    );

    // lenient mode admits it up to the hard maximum
    let decoded = read_pdu(&mut bytes.as_slice(), MINIMUM_PDU_SIZE, false)
        .unwrap()
        .unwrap();
    assert_eq!(decoded, pdu);
}

#[test]
fn partial_input_reports_no_pdu() {
    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &Pdu::ReleaseRQ).unwrap();
    let partial = &bytes[..bytes.len() - 2];
    assert_matches!(read_pdu(&mut &partial[..], DEFAULT_MAX_PDU, true), Ok(None));
}
