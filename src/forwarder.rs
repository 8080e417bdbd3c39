//! Splits client queries into single-question upstream queries and
//! reassembles the replies.

use std::collections::HashSet;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::message::{
    build_client_response, build_single_question_query, Header, Message, Question,
    ResourceRecord, ResponseCode,
};
use crate::upstream::UpstreamClient;

/// Answer section and response code from one upstream reply
#[derive(Debug)]
struct SubAnswer {
    rcode: ResponseCode,
    answers: Vec<ResourceRecord>,
}

#[derive(Debug)]
enum Slot {
    Pending,
    Answered(SubAnswer),
    Failed,
}

/// A client query whose sub-queries are in flight
///
/// Slots are indexed by question position, so the assembled response keeps
/// the client's question order whatever order the replies come back in.
#[derive(Debug)]
struct PendingQuery {
    request: Header,
    questions: Vec<Question>,
    slots: Vec<Slot>,
}

impl PendingQuery {
    fn new(request: Header, questions: Vec<Question>) -> Self {
        let slots = questions.iter().map(|_| Slot::Pending).collect();
        PendingQuery {
            request,
            questions,
            slots,
        }
    }

    fn fill(&mut self, index: usize, outcome: Result<SubAnswer>) {
        let Some(slot) = self.slots.get_mut(index) else {
            return;
        };

        *slot = match outcome {
            Ok(sub) => {
                trace!(
                    id = self.request.id,
                    index,
                    answers = sub.answers.len(),
                    "sub-query answered"
                );
                Slot::Answered(sub)
            }
            Err(e) => {
                warn!(
                    id = self.request.id,
                    index,
                    name = %self.questions[index].name,
                    "sub-query failed: {}",
                    e
                );
                Slot::Failed
            }
        };
    }

    fn outstanding(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Pending))
            .count()
    }

    /// Build the client response from whatever has arrived. Any question
    /// without an answer turns the response code into SERVFAIL.
    fn assemble(self) -> Result<Bytes> {
        let mut rcode = ResponseCode::NoError;
        let mut answers = Vec::new();

        for slot in self.slots {
            match slot {
                Slot::Answered(sub) => {
                    rcode = rcode.escalate(sub.rcode);
                    answers.extend(sub.answers);
                }
                Slot::Pending | Slot::Failed => {
                    rcode = rcode.escalate(ResponseCode::ServFail);
                }
            }
        }

        build_client_response(&self.request, &self.questions, &answers, rcode)
    }
}

/// Draw `count` distinct transaction ids from the full 16-bit space
pub fn transaction_ids(count: usize) -> Vec<u16> {
    let count = count.min(u16::MAX as usize + 1);
    let mut rng = rand::thread_rng();
    let mut seen = HashSet::with_capacity(count);
    let mut ids = Vec::with_capacity(count);

    while ids.len() < count {
        let id: u16 = rng.gen();
        if seen.insert(id) {
            ids.push(id);
        }
    }

    ids
}

async fn sub_query(upstream: &UpstreamClient, query: &[u8]) -> Result<SubAnswer> {
    let reply = upstream.query(query).await?;
    let message = Message::read(&reply)?;

    Ok(SubAnswer {
        rcode: message.header.rcode,
        answers: message.answers,
    })
}

/// Forwards client queries to one upstream resolver
#[derive(Clone, Debug)]
pub struct Forwarder {
    upstream: UpstreamClient,
    deadline: Duration,
}

impl Forwarder {
    /// `deadline` bounds the whole client query, all sub-queries included
    pub fn new(upstream: UpstreamClient, deadline: Duration) -> Self {
        Forwarder { upstream, deadline }
    }

    /// Produce the reply for one client datagram
    ///
    /// A datagram that does not decode yields a format error, and one with
    /// QR set yields `NotAQuery`. Both must be dropped. Errors relaying a
    /// question-less message are returned as is.
    /// Once questions are split, sub-query failures only show up in the
    /// response code.
    pub async fn handle(&self, datagram: &[u8]) -> Result<Bytes> {
        let message = Message::read(datagram)?;
        let request = message.header;

        if request.response {
            debug!(id = request.id, "ignoring response sent as a query");
            return Err(Error::NotAQuery(request.id));
        }

        if request.question_count == 0 {
            debug!(id = request.id, "no questions, relaying verbatim");
            return self.upstream.query(datagram).await;
        }

        if request.opcode != 0 {
            debug!(id = request.id, opcode = request.opcode, "unsupported opcode");
            return build_client_response(&request, &message.questions, &[], ResponseCode::NotImp);
        }

        self.resolve(PendingQuery::new(request, message.questions)).await
    }

    async fn resolve(&self, mut pending: PendingQuery) -> Result<Bytes> {
        let ids = transaction_ids(pending.questions.len());
        let queries = pending
            .questions
            .iter()
            .zip(ids)
            .map(|(question, id)| {
                build_single_question_query(question, id, pending.request.recursion_desired)
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            id = pending.request.id,
            questions = queries.len(),
            "splitting query"
        );

        let deadline = Instant::now() + self.deadline;
        let mut tasks = JoinSet::new();
        for (index, query) in queries.into_iter().enumerate() {
            let upstream = self.upstream.clone();
            tasks.spawn(async move { (index, sub_query(&upstream, &query).await) });
        }

        while pending.outstanding() > 0 {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((index, outcome)))) => pending.fill(index, outcome),
                Ok(Some(Err(e))) => warn!(id = pending.request.id, "sub-query task failed: {}", e),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        id = pending.request.id,
                        outstanding = pending.outstanding(),
                        "deadline elapsed, abandoning sub-queries"
                    );
                    break;
                }
            }
        }

        // late replies land on sockets that no longer exist
        tasks.abort_all();

        pending.assemble()
    }
}
