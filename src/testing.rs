//! Loopback stand-in for an upstream resolver

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::message::{Header, Message, QueryType, ResourceRecord, ResponseCode, CLASS_IN};

/// How the fake upstream answers one name
#[derive(Clone, Debug)]
pub enum Behaviour {
    Answer {
        records: Vec<[u8; 4]>,
        rcode: ResponseCode,
        delay: Duration,
    },
    Silent,
}

impl Behaviour {
    pub fn answer(records: &[[u8; 4]]) -> Behaviour {
        Behaviour::Answer {
            records: records.to_vec(),
            rcode: ResponseCode::NoError,
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(self, millis: u64) -> Behaviour {
        match self {
            Behaviour::Answer { records, rcode, .. } => Behaviour::Answer {
                records,
                rcode,
                delay: Duration::from_millis(millis),
            },
            Behaviour::Silent => Behaviour::Silent,
        }
    }

    pub fn with_rcode(self, rcode: ResponseCode) -> Behaviour {
        match self {
            Behaviour::Answer { records, delay, .. } => Behaviour::Answer {
                records,
                rcode,
                delay,
            },
            Behaviour::Silent => Behaviour::Silent,
        }
    }
}

/// Answers A queries from a fixed plan. Names not in the plan get an empty
/// NOERROR reply, question-less messages are echoed back with QR set.
pub struct FakeUpstream {
    pub addr: SocketAddr,
    queries: mpsc::UnboundedReceiver<Message>,
}

impl FakeUpstream {
    pub async fn start(plan: impl IntoIterator<Item = (&'static str, Behaviour)>) -> FakeUpstream {
        let plan: HashMap<String, Behaviour> = plan
            .into_iter()
            .map(|(name, behaviour)| (name.to_string(), behaviour))
            .collect();

        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();
        let (tx, queries) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                let Ok((len, src)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                let Ok(query) = Message::read(&buf[..len]) else {
                    continue;
                };
                let _ = tx.send(query.clone());

                let Some((reply, delay)) = reply_for(&plan, &query, &buf[..len]) else {
                    continue;
                };
                let socket = socket.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = socket.send_to(&reply, src).await;
                });
            }
        });

        FakeUpstream { addr, queries }
    }

    /// Wait for the next `count` queries the upstream has seen
    pub async fn received(&mut self, count: usize) -> Vec<Message> {
        let mut seen = Vec::with_capacity(count);
        for _ in 0..count {
            let query = tokio::time::timeout(Duration::from_secs(2), self.queries.recv())
                .await
                .expect("upstream saw too few queries")
                .expect("upstream stopped");
            seen.push(query);
        }
        seen
    }

    pub fn nothing_received(&mut self) -> bool {
        self.queries.try_recv().is_err()
    }
}

fn reply_for(
    plan: &HashMap<String, Behaviour>,
    query: &Message,
    raw: &[u8],
) -> Option<(Bytes, Duration)> {
    let Some(question) = query.questions.first() else {
        let mut echo = raw.to_vec();
        echo[2] |= 0x80;
        return Some((Bytes::from(echo), Duration::ZERO));
    };

    let (records, rcode, delay) = match plan.get(&question.name.to_string()) {
        Some(Behaviour::Silent) => return None,
        Some(Behaviour::Answer {
            records,
            rcode,
            delay,
        }) => (records.clone(), *rcode, *delay),
        None => (Vec::new(), ResponseCode::NoError, Duration::ZERO),
    };

    let reply = Message {
        header: Header {
            id: query.header.id,
            response: true,
            recursion_desired: query.header.recursion_desired,
            recursion_available: true,
            rcode,
            ..Header::default()
        },
        questions: query.questions.clone(),
        answers: records
            .iter()
            .map(|addr| ResourceRecord {
                name: question.name.clone(),
                rtype: QueryType::A,
                class: CLASS_IN,
                ttl: 60,
                rdata: Bytes::copy_from_slice(addr),
            })
            .collect(),
    };

    Some((reply.write().unwrap(), delay))
}
