//! Basic request/response procedures

use super::current;
use crate::template::Template;
use crate::testcase::{Halt, Sender, Step, TestRun, Testcase};
use coapcheck_core::message::{Code, MessageType, OptionNumber, Token};
use coapcheck_core::verdict::Verdict;

/// Match a confirmable request and return its message id and token
fn con_request(t: &mut TestRun<'_>, code: Code, uri: &str, extra: Vec<Template>) -> Step<(u16, Token)> {
    let request = Template::coap(MessageType::Con, code).and_opt(t.uri(uri, extra));
    t.match_coap(Sender::Client, Some(&request), Verdict::Inconclusive)?;
    let msg = current(t)?;
    Ok((msg.message_id, msg.token.clone()))
}

/// Piggybacked response echoing the request's message id and token
fn piggybacked(code: Template, mid: u16, token: Token) -> Template {
    Template::Type(MessageType::Ack)
        .and(code)
        .and(Template::MessageId(mid))
        .and(Template::Token(token))
}

pub struct TdCoapCore01;

impl Testcase for TdCoapCore01 {
    fn name(&self) -> &'static str {
        "TD_COAP_CORE_01"
    }

    fn objective(&self) -> &'static str {
        "Perform GET transaction (CON mode)"
    }

    fn run(&self, t: &mut TestRun<'_>) -> Step {
        let (mid, token) = con_request(t, Code::GET, "/test", vec![])?;
        t.next(false)?;

        let response = piggybacked(Template::Code(Code::CONTENT), mid, token)
            .and(Template::non_empty_payload());
        t.match_coap(Sender::Server, Some(&response), Verdict::Fail)?;
        t.match_coap(
            Sender::Server,
            Some(&Template::Option(OptionNumber::CONTENT_FORMAT)),
            Verdict::Fail,
        )?;
        Ok(())
    }
}

pub struct TdCoapCore02;

impl Testcase for TdCoapCore02 {
    fn name(&self) -> &'static str {
        "TD_COAP_CORE_02"
    }

    fn objective(&self) -> &'static str {
        "Perform DELETE transaction (CON mode)"
    }

    fn run(&self, t: &mut TestRun<'_>) -> Step {
        let (mid, token) = con_request(t, Code::DELETE, "/test", vec![])?;
        t.next(false)?;

        let response = piggybacked(Template::Code(Code::DELETED), mid, token);
        t.match_coap(Sender::Server, Some(&response), Verdict::Fail)?;
        Ok(())
    }
}

pub struct TdCoapCore03;

impl Testcase for TdCoapCore03 {
    fn name(&self) -> &'static str {
        "TD_COAP_CORE_03"
    }

    fn objective(&self) -> &'static str {
        "Perform PUT transaction (CON mode)"
    }

    fn run(&self, t: &mut TestRun<'_>) -> Step {
        let (mid, token) = con_request(t, Code::PUT, "/test", vec![])?;
        let content = Template::non_empty_payload().and(Template::Option(OptionNumber::CONTENT_FORMAT));
        t.match_coap(Sender::Client, Some(&content), Verdict::Fail)?;
        t.next(false)?;

        let codes = Template::one_of([Template::Code(Code::CHANGED), Template::Code(Code::CREATED)]);
        t.match_coap(Sender::Server, Some(&piggybacked(codes, mid, token)), Verdict::Fail)?;
        Ok(())
    }
}

pub struct TdCoapCore04;

impl Testcase for TdCoapCore04 {
    fn name(&self) -> &'static str {
        "TD_COAP_CORE_04"
    }

    fn objective(&self) -> &'static str {
        "Perform POST transaction (CON mode)"
    }

    fn run(&self, t: &mut TestRun<'_>) -> Step {
        let (mid, token) = con_request(t, Code::POST, "/test", vec![])?;
        t.next(false)?;

        let codes = Template::one_of([Template::Code(Code::CREATED), Template::Code(Code::CHANGED)]);
        t.match_coap(Sender::Server, Some(&piggybacked(codes, mid, token)), Verdict::Fail)?;
        Ok(())
    }
}

pub struct TdCoapCore05;

impl Testcase for TdCoapCore05 {
    fn name(&self) -> &'static str {
        "TD_COAP_CORE_05"
    }

    fn objective(&self) -> &'static str {
        "Perform GET transaction (NON mode)"
    }

    fn run(&self, t: &mut TestRun<'_>) -> Step {
        let request = Template::coap(MessageType::Non, Code::GET).and_opt(t.uri("/test", []));
        t.match_coap(Sender::Client, Some(&request), Verdict::Inconclusive)?;
        let token = current(t)?.token.clone();
        t.next(false)?;

        let response = Template::coap(MessageType::Non, Code::CONTENT)
            .and(Template::Token(token))
            .and(Template::non_empty_payload());
        t.match_coap(Sender::Server, Some(&response), Verdict::Fail)?;
        Ok(())
    }
}

pub struct TdCoapCore09;

impl Testcase for TdCoapCore09 {
    fn name(&self) -> &'static str {
        "TD_COAP_CORE_09"
    }

    fn objective(&self) -> &'static str {
        "Perform GET transaction with separate response (CON mode)"
    }

    fn run(&self, t: &mut TestRun<'_>) -> Step {
        let (mid, token) = con_request(t, Code::GET, "/separate", vec![])?;
        t.next(false)?;

        let empty_ack = Template::coap(MessageType::Ack, Code::EMPTY).and(Template::MessageId(mid));
        if !t.match_coap(Sender::Server, Some(&empty_ack), Verdict::Inconclusive)? {
            return Err(Halt::Stop);
        }
        t.next(false)?;

        let response = Template::coap(MessageType::Con, Code::CONTENT)
            .and(Template::Token(token))
            .and(Template::non_empty_payload());
        t.match_coap(Sender::Server, Some(&response), Verdict::Fail)?;
        let response_mid = current(t)?.message_id;
        t.next(false)?;

        let ack = Template::coap(MessageType::Ack, Code::EMPTY).and(Template::MessageId(response_mid));
        t.match_coap(Sender::Client, Some(&ack), Verdict::Fail)?;
        Ok(())
    }
}

pub struct TdCoapCore10;

impl Testcase for TdCoapCore10 {
    fn name(&self) -> &'static str {
        "TD_COAP_CORE_10"
    }

    fn objective(&self) -> &'static str {
        "Handle request containing Token option"
    }

    fn run(&self, t: &mut TestRun<'_>) -> Step {
        let (mid, token) = con_request(t, Code::GET, "/test", vec![Template::non_empty_token()])?;
        t.next(false)?;

        let response = piggybacked(Template::Code(Code::CONTENT), mid, token)
            .and(Template::non_empty_payload());
        t.match_coap(Sender::Server, Some(&response), Verdict::Fail)?;
        Ok(())
    }
}

pub struct TdCoapCore11;

impl Testcase for TdCoapCore11 {
    fn name(&self) -> &'static str {
        "TD_COAP_CORE_11"
    }

    fn objective(&self) -> &'static str {
        "Handle request not containing Token option"
    }

    fn run(&self, t: &mut TestRun<'_>) -> Step {
        let (mid, _) = con_request(t, Code::GET, "/test", vec![Template::Token(Token::empty())])?;
        t.next(false)?;

        let response = piggybacked(Template::Code(Code::CONTENT), mid, Token::empty())
            .and(Template::non_empty_payload());
        t.match_coap(Sender::Server, Some(&response), Verdict::Fail)?;
        Ok(())
    }
}

pub struct TdCoapCore12;

impl Testcase for TdCoapCore12 {
    fn name(&self) -> &'static str {
        "TD_COAP_CORE_12"
    }

    fn objective(&self) -> &'static str {
        "Handle request containing several Uri-Path options"
    }

    fn run(&self, t: &mut TestRun<'_>) -> Step {
        let (mid, token) = con_request(
            t,
            Code::GET,
            "/seg1/seg2/seg3",
            vec![Template::Option(OptionNumber::URI_PATH)],
        )?;
        t.next(false)?;

        let response = piggybacked(Template::Code(Code::CONTENT), mid, token)
            .and(Template::non_empty_payload());
        t.match_coap(Sender::Server, Some(&response), Verdict::Fail)?;
        Ok(())
    }
}

pub struct TdCoapCore13;

impl Testcase for TdCoapCore13 {
    fn name(&self) -> &'static str {
        "TD_COAP_CORE_13"
    }

    fn objective(&self) -> &'static str {
        "Handle request containing several Uri-Query options"
    }

    fn run(&self, t: &mut TestRun<'_>) -> Step {
        let (mid, token) = con_request(
            t,
            Code::GET,
            "/query?first=1&second=2",
            vec![Template::Option(OptionNumber::URI_QUERY)],
        )?;
        t.next(false)?;

        let response = piggybacked(Template::Code(Code::CONTENT), mid, token)
            .and(Template::non_empty_payload());
        t.match_coap(Sender::Server, Some(&response), Verdict::Fail)?;
        Ok(())
    }
}
