//! Abort-path tests:
//! unrecognized PDUs force a provider abort,
//! and a vanished peer surfaces as a network error
//! on the pending operation.

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use dicom_dimse::association::machine::TimeoutOptions;
use dicom_dimse::association::server::{Server, ServerOptions, ServiceHandler};
use dicom_dimse::association::wire::read_pdu_from_wire;
use dicom_dimse::association::{Association, Client};
use dicom_dimse::pdu::{
    write_pdu, AbortRQServiceProviderReason, AbortRQSource, Pdu, DEFAULT_MAX_PDU,
};
use dicom_dimse::{uids, Request};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync + 'static>>;

struct EchoHandler;

impl ServiceHandler for EchoHandler {
    fn association_requested(&mut self, association: &mut Association) {
        association.negotiate(
            &[uids::VERIFICATION],
            &[uids::IMPLICIT_VR_LITTLE_ENDIAN, uids::EXPLICIT_VR_LITTLE_ENDIAN],
        );
    }
}

#[test]
fn unrecognized_pdu_type_aborts_the_association() -> Result<()> {
    let listener = TcpListener::bind("localhost:0")?;
    let addr = listener.local_addr()?;

    let scp_handle = std::thread::spawn(move || {
        let server = Server::new(
            ServerOptions::new()
                .ae_title("ABORT-SCP")
                .timeouts(TimeoutOptions::new().read_timeout(Duration::from_secs(10))),
            || EchoHandler,
        );
        let (stream, _peer) = listener.accept().expect("accept must succeed");
        server.serve_connection(stream)
    });

    // negotiate a valid association by hand,
    // then send a PDU with a type byte the protocol does not define
    let mut association = Association::new("RAW-SCU", "ABORT-SCP")?;
    association.add_presentation_context_from_request(&Request::c_echo(1), None)?;

    let mut socket = TcpStream::connect(addr)?;
    socket.set_read_timeout(Some(Duration::from_secs(10)))?;
    let mut read_buffer = BytesMut::new();

    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &association.to_association_rq().into())?;
    socket.write_all(&bytes)?;
    let pdu = read_pdu_from_wire(&mut socket, &mut read_buffer, DEFAULT_MAX_PDU, true)?;
    assert!(matches!(pdu, Pdu::AssociationAC(_)));

    bytes.clear();
    write_pdu(
        &mut bytes,
        &Pdu::Unknown {
            pdu_type: 0xAA,
            data: vec![0xDE, 0xAD],
        },
    )?;
    socket.write_all(&bytes)?;

    // the acceptor answers with a provider abort, reason: unrecognized PDU
    let pdu = read_pdu_from_wire(&mut socket, &mut read_buffer, DEFAULT_MAX_PDU, true)?;
    assert_eq!(
        pdu,
        Pdu::AbortRQ {
            source: AbortRQSource::ServiceProvider(AbortRQServiceProviderReason::UnrecognizedPdu),
        }
    );

    let scp_result = scp_handle.join().expect("SCP thread must not panic");
    assert!(matches!(
        scp_result,
        Err(dicom_dimse::association::server::Error::UnknownPdu { .. })
    ));
    Ok(())
}

#[test]
fn vanished_peer_fails_the_pending_request_as_a_network_error() -> Result<()> {
    let listener = TcpListener::bind("localhost:0")?;
    let addr = listener.local_addr()?;

    // a hand-rolled acceptor which negotiates properly
    // and then drops the connection on the first data PDU
    let scp_handle = std::thread::spawn(move || -> Result<()> {
        let (mut stream, _peer) = listener.accept()?;
        stream.set_read_timeout(Some(Duration::from_secs(10)))?;
        let mut read_buffer = BytesMut::new();

        let pdu = read_pdu_from_wire(&mut stream, &mut read_buffer, DEFAULT_MAX_PDU, true)?;
        let rq = match pdu {
            Pdu::AssociationRQ(rq) => rq,
            other => panic!("expected an association request, got {:?}", other),
        };
        let mut association = Association::from_association_rq(&rq)?;
        association.negotiate(&[] as &[&str], &[uids::IMPLICIT_VR_LITTLE_ENDIAN, uids::EXPLICIT_VR_LITTLE_ENDIAN]);

        let mut bytes = Vec::new();
        write_pdu(&mut bytes, &association.to_association_ac().into())?;
        stream.write_all(&bytes)?;

        // wait for the echo command, then vanish without a word
        let _ = read_pdu_from_wire(&mut stream, &mut read_buffer, DEFAULT_MAX_PDU, true)?;
        drop(stream);
        Ok(())
    });

    let observed_response = Arc::new(AtomicBool::new(false));
    let observed = Arc::clone(&observed_response);

    let mut client = Client::new().timeouts(
        TimeoutOptions::new()
            .connect_timeout(Duration::from_secs(5))
            .read_timeout(Duration::from_secs(10)),
    );
    client.add_request(Request::c_echo(1));
    let outcome = client.send_with(addr, "ECHO-SCU", "GHOST-SCP", move |_response, _control| {
        observed.store(true, Ordering::SeqCst);
    });

    // the pending request fails once, with a network error
    match outcome {
        Err(dicom_dimse::association::client::Error::Receive { ref source }) => {
            assert!(!source.is_timeout(), "the peer closed, it did not stall");
        }
        other => panic!("expected a network error, got {:?}", other),
    }
    assert!(!observed_response.load(Ordering::SeqCst));

    scp_handle.join().expect("peer thread must not panic")?;
    Ok(())
}
