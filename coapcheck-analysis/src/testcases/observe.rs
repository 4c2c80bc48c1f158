use super::current;
use crate::template::Template;
use crate::testcase::{Sender, Step, TestRun, Testcase};
use coapcheck_core::message::{Code, MessageType, OptionNumber};
use coapcheck_core::verdict::Verdict;

pub struct TdCoapObs01;

impl Testcase for TdCoapObs01 {
    fn name(&self) -> &'static str {
        "TD_COAP_OBS_01"
    }

    fn objective(&self) -> &'static str {
        "Handle resource observation"
    }

    fn run(&self, t: &mut TestRun<'_>) -> Step {
        let request = Template::coap(MessageType::Con, Code::GET)
            .and(Template::Option(OptionNumber::OBSERVE))
            .and_opt(t.uri("/obs", []));
        t.match_coap(Sender::Client, Some(&request), Verdict::Inconclusive)?;
        let token = current(t)?.token.clone();
        t.next_skip_ack(false)?;

        let notification = Template::Code(Code::CONTENT)
            .and(Template::Token(token))
            .and(Template::Option(OptionNumber::OBSERVE))
            .and(Template::non_empty_payload());
        t.match_coap(Sender::Server, Some(&notification), Verdict::Fail)?;

        // at least one notification after the registration response
        t.next_skip_ack(false)?;
        t.match_coap(Sender::Server, Some(&notification), Verdict::Fail)?;

        let mut count = 1;
        while t.next_skip_ack(true)?.is_some() {
            let msg = current(t)?;
            if msg.mtype == MessageType::Rst {
                t.match_coap(Sender::Client, Some(&Template::Type(MessageType::Rst)), Verdict::Fail)?;
                t.log("  observation cancelled by reset");
                break;
            }
            if msg.is_request() {
                let deregister = Template::Code(Code::GET).and(Template::NoOption(OptionNumber::OBSERVE));
                t.match_coap(Sender::Client, Some(&deregister), Verdict::Fail)?;
                t.log("  observation cancelled by deregistration");
                t.next_skip_ack(false)?;
                t.match_coap(
                    Sender::Server,
                    Some(&Template::Code(Code::CONTENT)),
                    Verdict::Fail,
                )?;
                break;
            }
            t.match_coap(Sender::Server, Some(&notification), Verdict::Fail)?;
            count += 1;
        }
        t.log(format!("  {count} notifications received"));
        Ok(())
    }
}
