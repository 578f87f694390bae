use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use pdrx_proto::platform::GET_PDR;
use pdrx_proto::InstanceId;

use super::*;

const EID: Eid = Eid(9);
const TID: TerminusId = TerminusId(1);

enum Reply {
	Respond(Vec<u8>),
	WrongCommand,
	Hang,
	Fail(TransportError),
}

#[derive(Default)]
struct ScriptedTransport {
	replies: Mutex<VecDeque<Reply>>,
	seen: Mutex<Vec<PldmMessage>>,
}

impl ScriptedTransport {
	fn with(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
		Arc::new(Self { replies: Mutex::new(replies.into_iter().collect()), seen: Mutex::default() })
	}
}

#[async_trait]
impl HostTransport for ScriptedTransport {
	async fn request(&self, _eid: Eid, request: PldmMessage) -> Result<PldmMessage, TransportError> {
		self.seen.lock().push(request.clone());
		let reply = self.replies.lock().pop_front();
		match reply {
			Some(Reply::Respond(payload)) => Ok(PldmMessage::new(request.header.response(), payload)),
			Some(Reply::WrongCommand) => {
				let mut header = request.header.response();
				header.command = 0x0A;
				Ok(PldmMessage::new(header, Vec::new()))
			}
			Some(Reply::Fail(e)) => Err(e),
			Some(Reply::Hang) | None => std::future::pending().await,
		}
	}
}

fn requester(transport: Arc<ScriptedTransport>) -> Requester {
	Requester::new(transport, Arc::new(InstanceIdDb::new()), RequesterConfig::default())
}

#[tokio::test(flavor = "current_thread")]
async fn response_payload_is_returned_and_id_released() {
	let transport = ScriptedTransport::with([Reply::Respond(vec![0, 1, 2])]);
	let requester = requester(transport.clone());

	let body = requester.send_recv(EID, TID, PldmType::Platform, GET_PDR, vec![7]).await.unwrap();
	assert_eq!(body, vec![0, 1, 2]);
	assert_eq!(requester.instance_ids().in_use(TID), 0);

	let seen = transport.seen.lock();
	assert_eq!(seen.len(), 1);
	assert!(seen[0].header.request);
	assert_eq!(seen[0].header.instance_id, InstanceId(0));
	assert_eq!(seen[0].payload, vec![7]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn timeouts_retry_with_the_same_instance_id() {
	let transport = ScriptedTransport::with([Reply::Hang, Reply::Hang, Reply::Respond(vec![0])]);
	let requester = requester(transport.clone());

	let body = requester.send_recv(EID, TID, PldmType::Platform, GET_PDR, Vec::new()).await.unwrap();
	assert_eq!(body, vec![0]);

	let seen = transport.seen.lock();
	assert_eq!(seen.len(), 3);
	assert!(seen.iter().all(|m| m.header.instance_id == seen[0].header.instance_id));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn exhausted_retries_report_timeout() {
	let transport = ScriptedTransport::with([]);
	let requester = requester(transport.clone());

	let err = requester.send_recv(EID, TID, PldmType::Platform, GET_PDR, Vec::new()).await.unwrap_err();
	assert_eq!(err, RequestError::Timeout { eid: EID, attempts: 3 });
	assert_eq!(transport.seen.lock().len(), 3);
	assert_eq!(requester.instance_ids().in_use(TID), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn transport_errors_are_not_retried() {
	let transport = ScriptedTransport::with([Reply::Fail(TransportError::Closed)]);
	let requester = requester(transport.clone());

	let err = requester.send_recv(EID, TID, PldmType::Platform, GET_PDR, Vec::new()).await.unwrap_err();
	assert_eq!(err, RequestError::Transport(TransportError::Closed));
	assert_eq!(transport.seen.lock().len(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn mismatched_command_is_rejected() {
	let transport = ScriptedTransport::with([Reply::WrongCommand]);
	let requester = requester(transport);

	let err = requester.send_recv(EID, TID, PldmType::Platform, GET_PDR, Vec::new()).await.unwrap_err();
	assert_eq!(err, RequestError::Mismatch { expected: GET_PDR, found: 0x0A });
}

#[tokio::test(flavor = "current_thread")]
async fn exhausted_ids_fail_without_sending() {
	let transport = ScriptedTransport::with([]);
	let requester = requester(transport.clone());
	for _ in 0..InstanceId::COUNT {
		requester.instance_ids().allocate(TID).unwrap();
	}

	let err = requester.send_recv(EID, TID, PldmType::Platform, GET_PDR, Vec::new()).await.unwrap_err();
	assert_eq!(err, RequestError::InstanceId(InstanceIdError::Exhausted(TID)));
	assert!(transport.seen.lock().is_empty());
}
