//! Block-wise transfer procedures

use super::current;
use crate::template::Template;
use crate::testcase::{Halt, Sender, Step, TestRun, Testcase};
use coapcheck_core::message::{Code, MessageType, OptionNumber};
use coapcheck_core::verdict::Verdict;

pub struct TdCoapBlock01;

impl Testcase for TdCoapBlock01 {
    fn name(&self) -> &'static str {
        "TD_COAP_BLOCK_01"
    }

    fn objective(&self) -> &'static str {
        "Handle GET blockwise transfer for large resource (early negotiation)"
    }

    fn run(&self, t: &mut TestRun<'_>) -> Step {
        let mut expected: u32 = 0;
        loop {
            let request = Template::coap(MessageType::Con, Code::GET)
                .and(Template::Option(OptionNumber::BLOCK2))
                .and_opt(t.uri("/large", []));
            let severity = if expected == 0 { Verdict::Inconclusive } else { Verdict::Fail };
            t.match_coap(Sender::Client, Some(&request), severity)?;

            let requested = current(t)?.block2().map_or(expected, |b| b.num);
            if requested != expected {
                t.set_verdict(
                    Verdict::Fail,
                    format!("expected a request for block #{expected}, got block #{requested}"),
                )?;
            }
            t.next_skip_ack(false)?;

            let response = Template::coap(MessageType::Ack, Code::CONTENT)
                .and(Template::Option(OptionNumber::BLOCK2))
                .and(Template::non_empty_payload());
            t.match_coap(Sender::Server, Some(&response), Verdict::Fail)?;

            let Some(block) = current(t)?.block2() else {
                return Err(Halt::Stop);
            };
            if !block.more {
                t.log(format!("  final block #{} received", block.num));
                return Ok(());
            }
            expected = block.num + 1;
            t.next(false)?;
        }
    }
}

pub struct TdCoapBlock02;

impl Testcase for TdCoapBlock02 {
    fn name(&self) -> &'static str {
        "TD_COAP_BLOCK_02"
    }

    fn objective(&self) -> &'static str {
        "Handle PUT blockwise transfer for large resource"
    }

    fn run(&self, t: &mut TestRun<'_>) -> Step {
        let mut expected: u32 = 0;
        loop {
            let request = Template::coap(MessageType::Con, Code::PUT)
                .and(Template::Option(OptionNumber::BLOCK1))
                .and_opt(t.uri("/large-update", []));
            let severity = if expected == 0 { Verdict::Inconclusive } else { Verdict::Fail };
            t.match_coap(Sender::Client, Some(&request), severity)?;

            let Some(block) = current(t)?.block1() else {
                return Err(Halt::Stop);
            };
            if block.num != expected {
                t.set_verdict(
                    Verdict::Fail,
                    format!("expected block #{expected}, got block #{}", block.num),
                )?;
            }
            t.next_skip_ack(false)?;

            if block.more {
                let response = Template::coap(MessageType::Ack, Code::CONTINUE)
                    .and(Template::Option(OptionNumber::BLOCK1));
                t.match_coap(Sender::Server, Some(&response), Verdict::Fail)?;
                expected = block.num + 1;
                t.next(false)?;
            } else {
                let codes = Template::one_of([
                    Template::Code(Code::CHANGED),
                    Template::Code(Code::CREATED),
                ]);
                let response = Template::Type(MessageType::Ack).and(codes);
                t.match_coap(Sender::Server, Some(&response), Verdict::Fail)?;
                return Ok(());
            }
        }
    }
}
