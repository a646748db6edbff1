//! End-to-end verification service tests:
//! a client queues C-ECHO (and C-STORE) requests
//! against a server thread, which answers through a handler.

use std::net::{SocketAddr, TcpListener};
use std::sync::mpsc;
use std::time::Duration;

use dicom_dimse::association::machine::TimeoutOptions;
use dicom_dimse::association::server::{Server, ServerOptions, ServiceHandler};
use dicom_dimse::association::{Association, Client};
use dicom_dimse::dimse::{Priority, Request, Response, Status, StatusCategory};
use dicom_dimse::{uids, Dataset};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync + 'static>>;

static SCU_AE_TITLE: &str = "ECHO-SCU";
static SCP_AE_TITLE: &str = "ECHO-SCP";

/// Stores every C-STORE instance UID it sees
/// and reports it over a channel at release time.
struct StorageHandler {
    stored: Vec<(String, usize)>,
    report: mpsc::Sender<Vec<(String, usize)>>,
}

impl ServiceHandler for StorageHandler {
    fn association_requested(&mut self, association: &mut Association) {
        association.negotiate(
            &[uids::VERIFICATION, uids::CT_IMAGE_STORAGE],
            &[uids::EXPLICIT_VR_LITTLE_ENDIAN, uids::IMPLICIT_VR_LITTLE_ENDIAN],
        );
    }

    fn c_store(&mut self, request: &Request) -> Response {
        let dataset = request.dataset().expect("C-STORE must carry a data set");
        self.stored.push((
            request.sop_instance_uid().unwrap_or_default().to_string(),
            dataset.len(),
        ));
        Response::from_request(request, Status::SUCCESS)
    }

    fn release_requested(&mut self) {
        let _ = self.report.send(self.stored.clone());
    }
}

fn spawn_scp(
    report: mpsc::Sender<Vec<(String, usize)>>,
) -> Result<(std::thread::JoinHandle<Result<()>>, SocketAddr)> {
    let listener = TcpListener::bind("localhost:0")?;
    let addr = listener.local_addr()?;

    let handle = std::thread::spawn(move || -> Result<()> {
        let server = Server::new(
            ServerOptions::new()
                .ae_title(SCP_AE_TITLE)
                .accept_called_ae_title()
                .timeouts(TimeoutOptions::new().read_timeout(Duration::from_secs(10))),
            move || StorageHandler {
                stored: Vec::new(),
                report: report.clone(),
            },
        );
        let (stream, _peer) = listener.accept()?;
        server.serve_connection(stream)?;
        assert!(server.statistics().bytes_read() > 0);
        assert!(server.statistics().bytes_written() > 0);
        Ok(())
    });
    Ok((handle, addr))
}

#[test]
fn echo_succeeds_and_releases_cleanly() -> Result<()> {
    let (report, _drain) = mpsc::channel();
    let (scp_handle, addr) = spawn_scp(report)?;

    let mut client = Client::new().timeouts(
        TimeoutOptions::new()
            .connect_timeout(Duration::from_secs(5))
            .read_timeout(Duration::from_secs(10)),
    );
    client.add_request(Request::c_echo(1));
    let outcomes = client.send(addr, SCU_AE_TITLE, SCP_AE_TITLE)?;

    assert_eq!(outcomes.len(), 1);
    // exactly one terminal response
    assert_eq!(outcomes[0].responses.len(), 1);
    let response = outcomes[0].final_response().expect("terminal response");
    assert_eq!(response.status().category(), StatusCategory::Success);
    assert_eq!(response.message_id_being_responded_to(), 1);

    // both sides moved bytes
    assert!(client.statistics().bytes_read() > 0);
    assert!(client.statistics().bytes_written() > 0);

    scp_handle.join().expect("SCP thread must not panic")?;
    Ok(())
}

#[test]
fn store_carries_the_data_set_across_fragmentation() -> Result<()> {
    let (report, stored) = mpsc::channel();
    let (scp_handle, addr) = spawn_scp(report)?;

    // larger than one PDU so the data set crosses fragment boundaries
    let pixel_bytes = vec![0x5A_u8; 60_000];
    let dataset = Dataset::new(uids::EXPLICIT_VR_LITTLE_ENDIAN, pixel_bytes);

    let mut client = Client::new().timeouts(
        TimeoutOptions::new()
            .connect_timeout(Duration::from_secs(5))
            .read_timeout(Duration::from_secs(10)),
    );
    client.add_request(Request::c_echo(1));
    client.add_request(Request::c_store(
        2,
        uids::CT_IMAGE_STORAGE,
        "1.2.3.4.5.6",
        Priority::Medium,
        dataset,
    ));
    let outcomes = client.send(addr, SCU_AE_TITLE, SCP_AE_TITLE)?;

    assert_eq!(outcomes.len(), 2);
    for outcome in &outcomes {
        let response = outcome.final_response().expect("terminal response");
        assert_eq!(response.status().category(), StatusCategory::Success);
    }
    assert_eq!(
        outcomes[1].final_response().unwrap().sop_instance_uid(),
        Some("1.2.3.4.5.6")
    );

    scp_handle.join().expect("SCP thread must not panic")?;

    let stored = stored.recv_timeout(Duration::from_secs(5))?;
    assert_eq!(stored, vec![("1.2.3.4.5.6".to_string(), 60_000)]);
    Ok(())
}

#[test]
fn wrong_called_ae_title_is_rejected() -> Result<()> {
    let (report, _drain) = mpsc::channel();
    let (scp_handle, addr) = spawn_scp(report)?;

    let mut client = Client::new().timeouts(
        TimeoutOptions::new()
            .connect_timeout(Duration::from_secs(5))
            .read_timeout(Duration::from_secs(10)),
    );
    client.add_request(Request::c_echo(1));
    let outcome = client.send(addr, SCU_AE_TITLE, "SOMEWHERE-ELSE");

    assert!(matches!(
        outcome,
        Err(dicom_dimse::association::client::Error::Rejected { .. })
    ));
    // the server reports the rejection as an error on its side too
    assert!(scp_handle.join().expect("SCP thread must not panic").is_err());
    Ok(())
}
