//! Integration tests for conversation tracking

mod common;

use coapcheck_core::frame::Frame;
use coapcheck_core::message::{CoapMessage, CoapOption, Code, MessageType};
use coapcheck_core::test_utils::*;
use common::{ids, partition, track};
use std::collections::BTreeSet;
use std::net::SocketAddr;

fn observe_get(mid: u16, token: &[u8]) -> CoapMessage {
    con_request(Code::GET, mid, token, "/obs").with_option(CoapOption::Observe(0))
}

fn notification(mtype: MessageType, mid: u16, token: &[u8], seq: u32) -> CoapMessage {
    CoapMessage::new(mtype, Code::CONTENT, mid)
        .with_token(token.to_vec())
        .with_option(CoapOption::Observe(seq))
        .with_payload("22.5")
}

#[test]
fn test_every_frame_is_accounted_for_once() {
    let frames = CaptureBuilder::new()
        .client(0.0, con_request(Code::GET, 1, b"A", "/test"))
        .non_coap(0.05)
        .server(0.1, ack_response(Code::CONTENT, 1, b"A").with_payload("hi"))
        .malformed(0.2, "truncated header")
        .server(0.3, ack_response(Code::CONTENT, 99, b"Z"))
        .client(1.0, con_request(Code::DELETE, 2, b"B", "/test"))
        .server(1.1, ack_response(Code::DELETED, 2, b"B"))
        .build();
    let all: BTreeSet<u32> = frames.iter().map(|f| f.id).collect();

    let (conversations, ignored) = track(frames);

    let mut seen: Vec<u32> = conversations.iter().flat_map(ids).collect();
    seen.extend(ignored.iter().map(|f| f.id));
    assert_eq!(seen.len(), all.len(), "a frame was attributed twice or lost");
    assert_eq!(seen.into_iter().collect::<BTreeSet<_>>(), all);

    assert_eq!(conversations.len(), 2);
    assert_eq!(ids(&conversations[0]), vec![1, 3]);
    assert_eq!(ids(&conversations[1]), vec![6, 7]);
    assert_eq!(ignored.iter().map(|f| f.id).collect::<Vec<_>>(), vec![2, 4, 5]);
}

#[test]
fn test_block1_upload_is_one_conversation() {
    let put = |mid, num, more| {
        con_request(Code::PUT, mid, b"T", "/large-update")
            .with_option(block1(num, more, 2))
            .with_payload(vec![b'x'; 64])
    };
    let frames = CaptureBuilder::new()
        .client(0.0, put(1, 0, true))
        .server(0.1, ack_response(Code::CONTINUE, 1, b"T").with_option(block1(0, true, 2)))
        .client(0.2, put(2, 1, true))
        .server(0.3, ack_response(Code::CONTINUE, 2, b"T").with_option(block1(1, true, 2)))
        .client(0.4, put(3, 2, false))
        .server(0.5, ack_response(Code::CHANGED, 3, b"T").with_option(block1(2, false, 2)))
        .client(5.0, put(4, 0, true))
        .build();

    let (conversations, ignored) = track(frames);

    assert!(ignored.is_empty());
    assert_eq!(conversations.len(), 2, "final block must clear the registration");
    assert_eq!(ids(&conversations[0]), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(ids(&conversations[1]), vec![7]);
}

#[test]
fn test_block2_download_follows_uri() {
    let get = |mid, token: &[u8], num| {
        con_request(Code::GET, mid, token, "/large").with_option(block2(num, false, 2))
    };
    let part = |mid, token: &[u8], num, more| {
        ack_response(Code::CONTENT, mid, token)
            .with_option(block2(num, more, 2))
            .with_payload(vec![b'y'; 64])
    };
    let frames = CaptureBuilder::new()
        .client(0.0, get(1, b"A", 0))
        .server(0.1, part(1, b"A", 0, true))
        .client(0.2, get(2, b"B", 1))
        .server(0.3, part(2, b"B", 1, true))
        .client(0.4, get(3, b"C", 2))
        .server(0.5, part(3, b"C", 2, false))
        .client(1.0, get(4, b"D", 0))
        .build();

    let (conversations, _) = track(frames);

    assert_eq!(conversations.len(), 2);
    assert_eq!(ids(&conversations[0]), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(ids(&conversations[1]), vec![7]);
    assert_eq!(conversations[0].uri.as_deref(), Some("/large"));
}

#[test]
fn test_observe_lifecycle_ends_with_deregistration() {
    let frames = CaptureBuilder::new()
        .client(0.0, observe_get(1, b"O"))
        .server(0.1, notification(MessageType::Ack, 1, b"O", 1))
        .server(2.0, notification(MessageType::Non, 100, b"O", 2))
        .server(4.0, notification(MessageType::Con, 101, b"O", 3))
        .client(4.1, empty_ack(101))
        .client(6.0, con_request(Code::GET, 2, b"D", "/obs"))
        .server(6.1, ack_response(Code::CONTENT, 2, b"D").with_payload("22.5"))
        .client(8.0, con_request(Code::GET, 3, b"E", "/obs"))
        .server(8.1, ack_response(Code::CONTENT, 3, b"E").with_payload("22.5"))
        .build();

    let (conversations, ignored) = track(frames);

    assert!(ignored.is_empty());
    assert_eq!(conversations.len(), 2);
    assert_eq!(ids(&conversations[0]), vec![1, 2, 3, 4, 5, 6, 7]);
    assert!(!conversations[0].observe_active);
    assert_eq!(ids(&conversations[1]), vec![8, 9]);
}

#[test]
fn test_reset_cancels_observation() {
    let frames = CaptureBuilder::new()
        .client(0.0, observe_get(1, b"O"))
        .server(0.1, notification(MessageType::Ack, 1, b"O", 1))
        .server(2.0, notification(MessageType::Con, 50, b"O", 2))
        .client(2.1, reset(50))
        .client(3.0, observe_get(2, b"P"))
        .server(3.1, notification(MessageType::Non, 51, b"O", 3))
        .build();

    let (conversations, ignored) = track(frames);

    assert!(ignored.is_empty());
    assert_eq!(conversations.len(), 2);
    // a late notification for the old token still belongs to the first one
    assert_eq!(ids(&conversations[0]), vec![1, 2, 3, 4, 6]);
    assert!(!conversations[0].observe_active);
    assert_eq!(ids(&conversations[1]), vec![5]);
    assert!(conversations[1].observe_active);
}

#[test]
fn test_repeated_observe_request_joins_active_observation() {
    let frames = CaptureBuilder::new()
        .client(0.0, observe_get(1, b"O"))
        .server(0.1, notification(MessageType::Ack, 1, b"O", 1))
        .client(30.0, observe_get(2, b"Q"))
        .server(30.1, notification(MessageType::Ack, 2, b"Q", 2))
        .build();

    let (conversations, _) = track(frames);

    assert_eq!(conversations.len(), 1);
    assert_eq!(ids(&conversations[0]), vec![1, 2, 3, 4]);
}

#[test]
fn test_message_id_correlation_expires() {
    let frames = CaptureBuilder::new()
        .client(0.0, con_request(Code::GET, 7, b"A", "/test"))
        .server(0.1, ack_response(Code::CONTENT, 7, b"A").with_payload("hi"))
        .server(10.0, reset(7))
        .server(100.0, reset(7))
        .server(101.0, reset(7))
        .build();

    let (conversations, ignored) = track(frames);

    assert_eq!(conversations.len(), 1);
    assert_eq!(ids(&conversations[0]), vec![1, 2, 3]);
    assert_eq!(ignored.iter().map(|f| f.id).collect::<Vec<_>>(), vec![4, 5]);
}

#[test]
fn test_separate_response_and_ping() {
    let frames = CaptureBuilder::new()
        .client(0.0, con_request(Code::GET, 1, b"S", "/separate"))
        .server(0.1, empty_ack(1))
        .server(1.0, CoapMessage::new(MessageType::Con, Code::CONTENT, 500).with_token(&b"S"[..]))
        .client(1.1, empty_ack(500))
        .client(2.0, CoapMessage::new(MessageType::Con, Code::EMPTY, 9))
        .server(2.1, reset(9))
        .build();

    let (conversations, ignored) = track(frames);

    assert!(ignored.is_empty());
    assert_eq!(conversations.len(), 2);
    assert_eq!(ids(&conversations[0]), vec![1, 2, 3, 4]);
    assert_eq!(ids(&conversations[1]), vec![5, 6]);
}

#[test]
fn test_partition_is_independent_of_tie_order() {
    let client_a: SocketAddr = "10.0.0.1:40000".parse().unwrap();
    let client_b: SocketAddr = "10.0.0.3:40000".parse().unwrap();
    let server: SocketAddr = "10.0.0.2:5683".parse().unwrap();

    let a1 = Frame::coap(1, 1.0, client_a, server, con_request(Code::GET, 1, b"A", "/test"));
    let a2 = Frame::coap(2, 1.0, server, client_a, ack_response(Code::CONTENT, 1, b"A"));
    let b1 = Frame::coap(3, 1.0, client_b, server, con_request(Code::GET, 1, b"A", "/test"));
    let b2 = Frame::coap(4, 1.0, server, client_b, ack_response(Code::CONTENT, 1, b"A"));

    let (first, _) = track(vec![a1.clone(), b1.clone(), a2.clone(), b2.clone()]);
    let (second, _) = track(vec![b1, a1, b2, a2]);

    assert_eq!(partition(&first), partition(&second));
    assert_eq!(first.len(), 2);
}

#[test]
fn test_conversations_of_a_pair_are_linked() {
    let frames = CaptureBuilder::new()
        .client(0.0, con_request(Code::GET, 1, b"A", "/test"))
        .server(0.1, ack_response(Code::CONTENT, 1, b"A"))
        .client(1.0, con_request(Code::GET, 2, b"B", "/test"))
        .server(1.1, ack_response(Code::CONTENT, 2, b"B"))
        .build();

    let (conversations, _) = track(frames);

    assert_eq!(conversations[0].next, Some(1));
    assert_eq!(conversations[1].next, None);
}
