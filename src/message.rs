//! DNS messages: header, questions and resource records
//!
//! Fixed-width fields are parsed with `nom`, names go through [`crate::name`].
//! Outbound messages are always written uncompressed.

use bytes::{BufMut, Bytes, BytesMut};
use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u32};
use nom::sequence::tuple;
use nom::IResult;

use crate::error::{FormatError, Result};
use crate::name::{encode_name, read_name, write_name, Name};

/// Size of the fixed DNS header
pub const HEADER_LEN: usize = 12;

/// Class IN
pub const CLASS_IN: u16 = 1;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResponseCode {
    NoError,
    FormErr,
    ServFail,
    NxDomain,
    NotImp,
    Refused,
    Other(u8),
}

impl ResponseCode {
    pub fn from_u8(num: u8) -> ResponseCode {
        match num & 0x0F {
            0 => ResponseCode::NoError,
            1 => ResponseCode::FormErr,
            2 => ResponseCode::ServFail,
            3 => ResponseCode::NxDomain,
            4 => ResponseCode::NotImp,
            5 => ResponseCode::Refused,
            x => ResponseCode::Other(x),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            ResponseCode::NoError => 0,
            ResponseCode::FormErr => 1,
            ResponseCode::ServFail => 2,
            ResponseCode::NxDomain => 3,
            ResponseCode::NotImp => 4,
            ResponseCode::Refused => 5,
            ResponseCode::Other(x) => x & 0x0F,
        }
    }

    /// Rank used when several upstream replies are merged into one response.
    /// A server failure outranks everything, an empty answer ranks lowest.
    pub fn severity(self) -> u8 {
        match self {
            ResponseCode::NoError => 0,
            ResponseCode::NxDomain => 1,
            ResponseCode::Other(_) => 2,
            ResponseCode::FormErr => 3,
            ResponseCode::NotImp => 4,
            ResponseCode::Refused => 5,
            ResponseCode::ServFail => 6,
        }
    }

    /// The more severe of two codes, `self` on a tie
    pub fn escalate(self, other: ResponseCode) -> ResponseCode {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

/// 12-byte message header
///
/// ```text
///   0  1  2  3  4  5  6  7  8  9 10 11 12 13 14 15
/// +--+-----------+--+--+--+--+--------+-----------+
/// |QR|  OPCODE   |AA|TC|RD|RA|   Z    |   RCODE   |
/// +--+-----------+--+--+--+--+--------+-----------+
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub id: u16,

    pub response: bool,            // 1 bit (0 query, 1 response)
    pub opcode: u8,                // 4 bits
    pub authoritative: bool,       // 1 bit
    pub truncated: bool,           // 1 bit
    pub recursion_desired: bool,   // 1 bit
    pub recursion_available: bool, // 1 bit
    pub z: u8,                     // 3 bits, reserved
    pub rcode: ResponseCode,       // 4 bits

    pub question_count: u16,
    pub answer_count: u16,
    pub authority_count: u16,
    pub additional_count: u16,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            id: 0,
            response: false,
            opcode: 0,
            authoritative: false,
            truncated: false,
            recursion_desired: false,
            recursion_available: false,
            z: 0,
            rcode: ResponseCode::NoError,
            question_count: 0,
            answer_count: 0,
            authority_count: 0,
            additional_count: 0,
        }
    }
}

fn header_fields(input: &[u8]) -> IResult<&[u8], (u16, u16, u16, u16, u16, u16)> {
    tuple((be_u16, be_u16, be_u16, be_u16, be_u16, be_u16))(input)
}

impl Header {
    /// Decode the header at the start of `buf`
    pub fn read(buf: &[u8]) -> Result<Header> {
        let (_, (id, flags, qd, an, ns, ar)) = header_fields(buf).map_err(|_| {
            FormatError::Truncated {
                offset: buf.len(),
            }
        })?;

        let hi = (flags >> 8) as u8;
        let lo = (flags & 0xFF) as u8;

        Ok(Header {
            id,
            response: hi & (1 << 7) != 0,
            opcode: (hi >> 3) & 0x0F,
            authoritative: hi & (1 << 2) != 0,
            truncated: hi & (1 << 1) != 0,
            recursion_desired: hi & 1 != 0,
            recursion_available: lo & (1 << 7) != 0,
            z: (lo >> 4) & 0x07,
            rcode: ResponseCode::from_u8(lo & 0x0F),
            question_count: qd,
            answer_count: an,
            authority_count: ns,
            additional_count: ar,
        })
    }

    /// Pack the flag sub-fields into the 16-bit flag word
    pub fn flags(&self) -> u16 {
        let hi = ((self.response as u8) << 7)
            | ((self.opcode & 0x0F) << 3)
            | ((self.authoritative as u8) << 2)
            | ((self.truncated as u8) << 1)
            | (self.recursion_desired as u8);
        let lo = ((self.recursion_available as u8) << 7)
            | ((self.z & 0x07) << 4)
            | self.rcode.to_u8();

        ((hi as u16) << 8) | lo as u16
    }

    pub fn write(&self, out: &mut BytesMut) {
        out.put_u16(self.id);
        out.put_u16(self.flags());
        out.put_u16(self.question_count);
        out.put_u16(self.answer_count);
        out.put_u16(self.authority_count);
        out.put_u16(self.additional_count);
    }
}

#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum QueryType {
    Unknown(u16),
    A,     // 1
    Ns,    // 2
    Cname, // 5
    Soa,   // 6
    Ptr,   // 12
    Mx,    // 15
    Txt,   // 16
    Aaaa,  // 28
}

impl QueryType {
    pub fn to_u16(self) -> u16 {
        match self {
            QueryType::Unknown(x) => x,
            QueryType::A => 1,
            QueryType::Ns => 2,
            QueryType::Cname => 5,
            QueryType::Soa => 6,
            QueryType::Ptr => 12,
            QueryType::Mx => 15,
            QueryType::Txt => 16,
            QueryType::Aaaa => 28,
        }
    }

    pub fn from_u16(num: u16) -> QueryType {
        match num {
            1 => QueryType::A,
            2 => QueryType::Ns,
            5 => QueryType::Cname,
            6 => QueryType::Soa,
            12 => QueryType::Ptr,
            15 => QueryType::Mx,
            16 => QueryType::Txt,
            28 => QueryType::Aaaa,
            _ => QueryType::Unknown(num),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Question {
    pub name: Name,
    pub qtype: QueryType,
    pub qclass: u16,
}

fn type_and_class(input: &[u8]) -> IResult<&[u8], (u16, u16)> {
    tuple((be_u16, be_u16))(input)
}

impl Question {
    pub fn new(name: impl Into<Name>, qtype: QueryType) -> Question {
        Question {
            name: name.into(),
            qtype,
            qclass: CLASS_IN,
        }
    }

    /// Decode the question at `offset`, returning it and the offset after it
    pub fn read(buf: &[u8], offset: usize) -> Result<(Question, usize)> {
        let (name, pos) = read_name(buf, offset)?;
        let input = &buf[pos..];
        let (rest, (qtype, qclass)) =
            type_and_class(input).map_err(|_| FormatError::Truncated { offset: pos })?;

        let question = Question {
            name,
            qtype: QueryType::from_u16(qtype),
            qclass,
        };
        Ok((question, buf.len() - rest.len()))
    }

    pub fn write(&self, out: &mut BytesMut) -> Result<()> {
        write_name(&self.name, out)?;
        out.put_u16(self.qtype.to_u16());
        out.put_u16(self.qclass);

        Ok(())
    }
}

/// An answer, authority or additional record
///
/// `rdata` is carried as raw bytes. For types that embed names in their
/// rdata the names are stored uncompressed, see [`ResourceRecord::read`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceRecord {
    pub name: Name,
    pub rtype: QueryType,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Bytes,
}

fn record_fields(input: &[u8]) -> IResult<&[u8], (u16, u16, u32, u16)> {
    tuple((be_u16, be_u16, be_u32, be_u16))(input)
}

fn rdata_bytes(input: &[u8], rdlength: u16) -> IResult<&[u8], &[u8]> {
    take(rdlength)(input)
}

impl ResourceRecord {
    /// Decode the record at `offset`, returning it and the offset after it
    ///
    /// The rdata of NS, CNAME, PTR, MX and SOA records may point back into
    /// the rest of the message. Those names are expanded here so the record
    /// can be written into another message unchanged.
    pub fn read(buf: &[u8], offset: usize) -> Result<(ResourceRecord, usize)> {
        let (name, pos) = read_name(buf, offset)?;
        let (rest, (rtype, class, ttl, rdlength)) =
            record_fields(&buf[pos..]).map_err(|_| FormatError::Truncated { offset: pos })?;

        let rdata_start = buf.len() - rest.len();
        let (rest, raw) = rdata_bytes(rest, rdlength).map_err(|_| FormatError::Truncated {
            offset: rdata_start,
        })?;

        let next = buf.len() - rest.len();
        let rtype = QueryType::from_u16(rtype);
        let rdata = expand_rdata(buf, rtype, rdata_start, raw)?;

        let record = ResourceRecord {
            name,
            rtype,
            class,
            ttl,
            rdata,
        };
        Ok((record, next))
    }

    pub fn write(&self, out: &mut BytesMut) -> Result<()> {
        let rdlength = u16::try_from(self.rdata.len())
            .map_err(|_| FormatError::RdataTooLong(self.rdata.len()))?;

        write_name(&self.name, out)?;
        out.put_u16(self.rtype.to_u16());
        out.put_u16(self.class);
        out.put_u32(self.ttl);
        out.put_u16(rdlength);
        out.put_slice(&self.rdata);

        Ok(())
    }
}

/// Rewrite rdata that embeds domain names without compression pointers.
/// Names are only read from within the record's own rdata window.
fn expand_rdata(buf: &[u8], rtype: QueryType, start: usize, raw: &[u8]) -> Result<Bytes> {
    let end = start + raw.len();
    let in_rdata = |pos: usize| -> Result<usize> {
        if pos > end {
            return Err(FormatError::Truncated { offset: end }.into());
        }
        Ok(pos)
    };

    match rtype {
        QueryType::Ns | QueryType::Cname | QueryType::Ptr => {
            let (host, pos) = read_name(buf, start)?;
            in_rdata(pos)?;
            encode_name(&host)
        }
        QueryType::Mx => {
            if raw.len() < 2 {
                return Err(FormatError::Truncated { offset: end }.into());
            }
            let (host, pos) = read_name(buf, start + 2)?;
            in_rdata(pos)?;

            let mut out = BytesMut::with_capacity(raw.len() + 16);
            out.put_slice(&raw[..2]);
            write_name(&host, &mut out)?;
            Ok(out.freeze())
        }
        QueryType::Soa => {
            let (mname, pos) = read_name(buf, start)?;
            let (rname, pos) = read_name(buf, in_rdata(pos)?)?;
            // serial, refresh, retry, expire, minimum
            let counters = buf
                .get(in_rdata(pos)?..end)
                .filter(|counters| counters.len() == 20)
                .ok_or(FormatError::Truncated { offset: pos })?;

            let mut out = BytesMut::with_capacity(raw.len() + 32);
            write_name(&mname, &mut out)?;
            write_name(&rname, &mut out)?;
            out.put_slice(counters);
            Ok(out.freeze())
        }
        _ => Ok(Bytes::copy_from_slice(raw)),
    }
}

fn section_count(len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| FormatError::TooManyEntries(len).into())
}

/// A decoded message
///
/// Only the question and answer sections are decoded. The header keeps the
/// authority and additional counts as received.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
}

impl Message {
    /// Decode the header, questions and answers of `buf`
    pub fn read(buf: &[u8]) -> Result<Message> {
        let header = Header::read(buf)?;
        let mut pos = HEADER_LEN;

        // counts come off the wire, so don't trust them for preallocation
        let mut questions = Vec::new();
        for _ in 0..header.question_count {
            let (question, next) = Question::read(buf, pos)?;
            questions.push(question);
            pos = next;
        }

        let mut answers = Vec::new();
        for _ in 0..header.answer_count {
            let (answer, next) = ResourceRecord::read(buf, pos)?;
            answers.push(answer);
            pos = next;
        }

        Ok(Message {
            header,
            questions,
            answers,
        })
    }

    /// Encode the message, taking section counts from the sections themselves.
    /// Authority and additional sections are written empty.
    pub fn write(&self) -> Result<Bytes> {
        let mut header = self.header.clone();
        header.question_count = section_count(self.questions.len())?;
        header.answer_count = section_count(self.answers.len())?;
        header.authority_count = 0;
        header.additional_count = 0;

        let mut out = BytesMut::with_capacity(512);
        header.write(&mut out);
        for question in &self.questions {
            question.write(&mut out)?;
        }
        for answer in &self.answers {
            answer.write(&mut out)?;
        }

        Ok(out.freeze())
    }
}

/// Build the single-question query sent upstream for one split question
pub fn build_single_question_query(
    question: &Question,
    id: u16,
    recursion_desired: bool,
) -> Result<Bytes> {
    let header = Header {
        id,
        recursion_desired,
        question_count: 1,
        ..Header::default()
    };

    let mut out = BytesMut::with_capacity(HEADER_LEN + question.name.encoded_len() + 4);
    header.write(&mut out);
    question.write(&mut out)?;

    Ok(out.freeze())
}

/// Build the response returned to the client
///
/// The id, opcode and RD bit come from the client's request. Answers must
/// already be ordered by their originating question.
pub fn build_client_response(
    request: &Header,
    questions: &[Question],
    answers: &[ResourceRecord],
    rcode: ResponseCode,
) -> Result<Bytes> {
    let message = Message {
        header: Header {
            id: request.id,
            response: true,
            opcode: request.opcode,
            authoritative: false,
            truncated: false,
            recursion_desired: request.recursion_desired,
            recursion_available: true,
            z: 0,
            rcode,
            ..Header::default()
        },
        questions: questions.to_vec(),
        answers: answers.to_vec(),
    };

    message.write()
}
