//! Expected-message templates
//!
//! A [`Template`] describes constraints on a [`CoapMessage`]. Templates are
//! built from small combinators and report every violated constraint as a
//! [`Mismatch`] so the testcase trace can show what differed.
use bytes::Bytes;
use coapcheck_core::message::{CoapMessage, CoapOption, Code, MessageType, OptionNumber, Token};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchKind {
    Value,
    MissingOption,
    UnexpectedOption,
    NoAlternative,
    Excluded,
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MismatchKind::Value => "ValueMismatch",
            MismatchKind::MissingOption => "MissingOption",
            MismatchKind::UnexpectedOption => "UnexpectedOption",
            MismatchKind::NoAlternative => "NoAlternative",
            MismatchKind::Excluded => "ExcludedValue",
        })
    }
}

/// One violated constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub path: String,
    pub kind: MismatchKind,
    pub got: String,
    pub expected: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Template {
    Type(MessageType),
    Code(Code),
    MessageId(u16),
    Token(Token),
    Payload(Bytes),
    /// Option present, any value
    Option(OptionNumber),
    /// Some occurrence of the option equals this one
    OptionValue(CoapOption),
    /// The occurrences of an option number are exactly these, in order
    OptionSequence(OptionNumber, Vec<CoapOption>),
    NoOption(OptionNumber),
    OneOf(Vec<Template>),
    Not(Box<Template>),
    All(Vec<Template>),
}

impl Template {
    pub fn all(parts: impl IntoIterator<Item = Template>) -> Self {
        Template::All(parts.into_iter().collect())
    }

    pub fn one_of(parts: impl IntoIterator<Item = Template>) -> Self {
        Template::OneOf(parts.into_iter().collect())
    }

    pub fn not(inner: Template) -> Self {
        Template::Not(Box::new(inner))
    }

    /// Message of the given type and code
    pub fn coap(mtype: MessageType, code: Code) -> Self {
        Template::All(vec![Template::Type(mtype), Template::Code(code)])
    }

    pub fn non_empty_payload() -> Self {
        Template::not(Template::Payload(Bytes::new()))
    }

    pub fn non_empty_token() -> Self {
        Template::not(Template::Token(Token::empty()))
    }

    /// Combine with another constraint; nested `All`s are flattened
    pub fn and(self, other: Template) -> Self {
        match (self, other) {
            (Template::All(mut a), Template::All(b)) => {
                a.extend(b);
                Template::All(a)
            }
            (Template::All(mut a), other) => {
                a.push(other);
                Template::All(a)
            }
            (this, Template::All(mut b)) => {
                b.insert(0, this);
                Template::All(b)
            }
            (this, other) => Template::All(vec![this, other]),
        }
    }

    /// `Some` extends the template, `None` leaves it unchanged
    pub fn and_opt(self, other: Option<Template>) -> Self {
        match other {
            Some(other) => self.and(other),
            None => self,
        }
    }

    pub fn is_match(&self, msg: &CoapMessage) -> bool {
        self.matches(msg).is_ok()
    }

    pub fn matches(&self, msg: &CoapMessage) -> Result<(), Vec<Mismatch>> {
        let mut mismatches = Vec::new();
        self.collect(msg, &mut mismatches);
        if mismatches.is_empty() {
            Ok(())
        } else {
            Err(mismatches)
        }
    }

    fn collect(&self, msg: &CoapMessage, out: &mut Vec<Mismatch>) {
        let value = |path: &str, got: String, expected: String| Mismatch {
            path: path.to_owned(),
            kind: MismatchKind::Value,
            got,
            expected,
        };

        match self {
            Template::Type(t) => {
                if msg.mtype != *t {
                    out.push(value("type", msg.mtype.to_string(), t.to_string()));
                }
            }
            Template::Code(c) => {
                if msg.code != *c {
                    out.push(value("code", msg.code.describe(), c.describe()));
                }
            }
            Template::MessageId(mid) => {
                if msg.message_id != *mid {
                    out.push(value("mid", msg.message_id.to_string(), mid.to_string()));
                }
            }
            Template::Token(tok) => {
                if msg.token != *tok {
                    out.push(value("tok", token_repr(&msg.token), token_repr(tok)));
                }
            }
            Template::Payload(pl) => {
                if msg.payload != *pl {
                    out.push(value("pl", payload_repr(&msg.payload), payload_repr(pl)));
                }
            }
            Template::Option(number) => {
                if !msg.has_option(*number) {
                    out.push(Mismatch {
                        path: format!("opt.{number}"),
                        kind: MismatchKind::MissingOption,
                        got: "absent".to_owned(),
                        expected: format!("{number}"),
                    });
                }
            }
            Template::OptionValue(option) => {
                let number = option.number();
                if !msg.options_of(number).any(|o| o == option) {
                    out.push(Mismatch {
                        path: format!("opt.{number}"),
                        kind: if msg.has_option(number) {
                            MismatchKind::Value
                        } else {
                            MismatchKind::MissingOption
                        },
                        got: options_repr(msg, number),
                        expected: option.to_string(),
                    });
                }
            }
            Template::OptionSequence(number, expected) => {
                let got: Vec<&CoapOption> = msg.options_of(*number).collect();
                let same = got.len() == expected.len() && got.iter().zip(expected).all(|(g, e)| *g == e);
                if !same {
                    let kind = if got.is_empty() {
                        MismatchKind::MissingOption
                    } else if expected.is_empty() {
                        MismatchKind::UnexpectedOption
                    } else {
                        MismatchKind::Value
                    };
                    out.push(Mismatch {
                        path: format!("opt.{number}"),
                        kind,
                        got: options_repr(msg, *number),
                        expected: list_repr(expected.iter()),
                    });
                }
            }
            Template::NoOption(number) => {
                if msg.has_option(*number) {
                    out.push(Mismatch {
                        path: format!("opt.{number}"),
                        kind: MismatchKind::UnexpectedOption,
                        got: options_repr(msg, *number),
                        expected: "absent".to_owned(),
                    });
                }
            }
            Template::OneOf(alternatives) => {
                let mut first = None;
                for alternative in alternatives {
                    match alternative.matches(msg) {
                        Ok(()) => return,
                        Err(mut m) if first.is_none() && !m.is_empty() => first = Some(m.remove(0)),
                        Err(_) => {}
                    }
                }
                let (path, got) = match first {
                    Some(m) => (m.path, m.got),
                    None => (String::new(), msg.summary()),
                };
                out.push(Mismatch {
                    path,
                    kind: MismatchKind::NoAlternative,
                    got,
                    expected: self.to_string(),
                });
            }
            Template::Not(inner) => {
                if inner.is_match(msg) {
                    out.push(Mismatch {
                        path: inner.field_path(),
                        kind: MismatchKind::Excluded,
                        got: inner.to_string(),
                        expected: self.to_string(),
                    });
                }
            }
            Template::All(parts) => {
                for part in parts {
                    part.collect(msg, out);
                }
            }
        }
    }

    fn field_path(&self) -> String {
        match self {
            Template::Type(_) => "type".to_owned(),
            Template::Code(_) => "code".to_owned(),
            Template::MessageId(_) => "mid".to_owned(),
            Template::Token(_) => "tok".to_owned(),
            Template::Payload(_) => "pl".to_owned(),
            Template::Option(n) | Template::OptionSequence(n, _) | Template::NoOption(n) => {
                format!("opt.{n}")
            }
            Template::OptionValue(o) => format!("opt.{}", o.number()),
            Template::Not(inner) => inner.field_path(),
            Template::OneOf(_) | Template::All(_) => String::new(),
        }
    }
}

fn token_repr(token: &Token) -> String {
    if token.is_empty() {
        "''".to_owned()
    } else {
        format!("0x{token}")
    }
}

fn payload_repr(payload: &Bytes) -> String {
    format!("{:?}", String::from_utf8_lossy(payload))
}

fn options_repr(msg: &CoapMessage, number: OptionNumber) -> String {
    let found: Vec<&CoapOption> = msg.options_of(number).collect();
    if found.is_empty() {
        "absent".to_owned()
    } else {
        list_repr(found.into_iter())
    }
}

fn list_repr<'a>(options: impl Iterator<Item = &'a CoapOption>) -> String {
    let items: Vec<String> = options.map(|o| o.to_string()).collect();
    format!("[{}]", items.join(", "))
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Template::Type(t) => write!(f, "type={t}"),
            Template::Code(c) => write!(f, "code={c}"),
            Template::MessageId(mid) => write!(f, "mid={mid}"),
            Template::Token(tok) => write!(f, "tok={}", token_repr(tok)),
            Template::Payload(pl) => write!(f, "pl={}", payload_repr(pl)),
            Template::Option(n) => write!(f, "opt={n}"),
            Template::OptionValue(o) => write!(f, "opt={o}"),
            Template::OptionSequence(_, seq) => write!(f, "opt={}", list_repr(seq.iter())),
            Template::NoOption(n) => write!(f, "opt=NoOpt({n})"),
            Template::OneOf(alternatives) => {
                let parts: Vec<String> = alternatives.iter().map(|t| t.to_string()).collect();
                write!(f, "({})", parts.join(" | "))
            }
            Template::Not(inner) => write!(f, "not({inner})"),
            Template::All(parts) => {
                let parts: Vec<String> = parts.iter().map(|t| t.to_string()).collect();
                write!(f, "CoAP({})", parts.join(", "))
            }
        }
    }
}
