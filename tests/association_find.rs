//! End-to-end query service test:
//! the handler emits a sequence of pending matches
//! and the client observes them as ordered progress events
//! before the terminal resolution.

use std::net::{SocketAddr, TcpListener};
use std::time::Duration;

use dicom_dimse::association::machine::TimeoutOptions;
use dicom_dimse::association::server::{Responses, Server, ServerOptions, ServiceHandler};
use dicom_dimse::association::{Association, Client};
use dicom_dimse::dimse::{Priority, Request, Response, Status, StatusCategory};
use dicom_dimse::{uids, Dataset};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync + 'static>>;

struct QueryHandler;

impl ServiceHandler for QueryHandler {
    fn association_requested(&mut self, association: &mut Association) {
        association.negotiate(
            &[uids::STUDY_ROOT_QR_FIND],
            &[uids::IMPLICIT_VR_LITTLE_ENDIAN],
        );
    }

    fn c_find(&mut self, request: &Request) -> Responses {
        let matches: Vec<Response> = (0..3_u8)
            .map(|i| {
                Response::from_request(request, Status::PENDING).with_dataset(Dataset::new(
                    uids::IMPLICIT_VR_LITTLE_ENDIAN,
                    vec![i; 32],
                ))
            })
            .chain(std::iter::once(Response::from_request(
                request,
                Status::SUCCESS,
            )))
            .collect();
        Box::new(matches.into_iter())
    }
}

fn spawn_scp() -> Result<(std::thread::JoinHandle<Result<()>>, SocketAddr)> {
    let listener = TcpListener::bind("localhost:0")?;
    let addr = listener.local_addr()?;
    let handle = std::thread::spawn(move || -> Result<()> {
        let server = Server::new(
            ServerOptions::new()
                .ae_title("FIND-SCP")
                .timeouts(TimeoutOptions::new().read_timeout(Duration::from_secs(10))),
            || QueryHandler,
        );
        let (stream, _peer) = listener.accept()?;
        server.serve_connection(stream)?;
        Ok(())
    });
    Ok((handle, addr))
}

#[test]
fn find_emits_ordered_progress_then_resolution() -> Result<()> {
    let (scp_handle, addr) = spawn_scp()?;

    let query = Dataset::new(uids::IMPLICIT_VR_LITTLE_ENDIAN, vec![0x10, 0x00, 0x10, 0x00]);
    let mut client = Client::new().timeouts(
        TimeoutOptions::new()
            .connect_timeout(Duration::from_secs(5))
            .read_timeout(Duration::from_secs(10)),
    );
    client.add_request(Request::c_find(
        7,
        uids::STUDY_ROOT_QR_FIND,
        Priority::Medium,
        query,
    ));

    let mut observed = Vec::new();
    let outcomes = client.send_with(addr, "FIND-SCU", "FIND-SCP", |response, _control| {
        observed.push(response.status().category());
    })?;

    // three progress events, then the resolution, in emission order
    assert_eq!(
        observed,
        vec![
            StatusCategory::Pending,
            StatusCategory::Pending,
            StatusCategory::Pending,
            StatusCategory::Success,
        ]
    );

    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];
    assert_eq!(outcome.responses.len(), 4);
    assert_eq!(outcome.pending_responses().count(), 3);

    // every pending match carries its identifier, in order
    for (i, response) in outcome.pending_responses().enumerate() {
        let dataset = response.dataset().expect("pending match carries a data set");
        assert_eq!(dataset.data(), &vec![i as u8; 32][..]);
    }
    let resolution = outcome.final_response().expect("terminal response");
    assert_eq!(resolution.status().category(), StatusCategory::Success);
    assert_eq!(resolution.message_id_being_responded_to(), 7);
    assert!(resolution.dataset().is_none());

    scp_handle.join().expect("SCP thread must not panic")?;
    Ok(())
}

#[test]
fn query_for_an_unsupported_sop_class_fails_before_sending() -> Result<()> {
    let (scp_handle, addr) = spawn_scp()?;

    let mut client = Client::new().timeouts(
        TimeoutOptions::new()
            .connect_timeout(Duration::from_secs(5))
            .read_timeout(Duration::from_secs(10)),
    );
    // the handler only accepts the study root find model
    client.add_request(Request::c_find(
        1,
        uids::STUDY_ROOT_QR_FIND,
        Priority::Medium,
        Dataset::new(uids::IMPLICIT_VR_LITTLE_ENDIAN, vec![0; 4]),
    ));
    client.add_request(Request::c_find(
        2,
        uids::MODALITY_WORKLIST_FIND,
        Priority::Medium,
        Dataset::new(uids::IMPLICIT_VR_LITTLE_ENDIAN, vec![0; 4]),
    ));

    let outcome = client.send(addr, "FIND-SCU", "FIND-SCP");
    match outcome {
        Err(dicom_dimse::association::client::Error::NoAcceptedPresentationContext {
            message_id,
            ref sop_class_uid,
            ..
        }) => {
            assert_eq!(message_id, 2);
            assert_eq!(sop_class_uid, uids::MODALITY_WORKLIST_FIND);
        }
        other => panic!("expected NoAcceptedPresentationContext, got {:?}", other),
    }

    // the failure happened before any DIMSE message went out:
    // the server saw no service call and the connection just dropped
    let scp_result = scp_handle.join().expect("SCP thread must not panic");
    assert!(scp_result.is_err());
    Ok(())
}
