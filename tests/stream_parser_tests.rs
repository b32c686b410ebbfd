use toolchat::engine::stream::{StreamItem, StreamParser};
use toolchat::engine::types::{EventType, RunState};

fn frame(item: &StreamItem) -> &toolchat::engine::types::Frame {
    match item {
        StreamItem::Frame(frame) => frame,
        StreamItem::Done => panic!("expected a frame, got Done"),
    }
}

#[test]
fn test_fragmented_events() {
    let mut parser = StreamParser::new();

    let events = parser.process(b"data: {\"call\": {\"id\": \"c1\", \"type\": \"callP");
    assert!(events.is_empty());

    let events = parser
        .process(b"rogress\", \"start\": \"2024-01-01T00:00:00Z\", \"output\": [{\"content\": \"Hi\"}]}}\n\n");
    assert_eq!(events.len(), 1);

    let call = frame(&events[0]).call.as_ref().expect("call frame");
    assert_eq!(call.id, "c1");
    assert_eq!(call.event_type, EventType::CallProgress);
    assert_eq!(call.output[0].content, "Hi");
}

#[test]
fn test_parse_error_handling() {
    let mut parser = StreamParser::new();

    let events = parser.process(b"data: {invalid json}\n\ndata: [DONE]\n\n");
    assert_eq!(events, vec![StreamItem::Done]);
}

#[test]
fn test_crlf_framing_and_multiple_events_per_chunk() {
    let mut parser = StreamParser::new();

    let chunk = b"data: {\"run\": {\"id\": \"r\", \"type\": \"runStart\"}}\r\n\r\n\
data: {\"run\": {\"id\": \"r\", \"type\": \"runFinish\", \"state\": \"finished\"}}\r\n\r\n";
    let events = parser.process(chunk);
    assert_eq!(events.len(), 2);

    let finish = frame(&events[1]).run.as_ref().expect("run frame");
    assert_eq!(finish.event_type, EventType::RunFinish);
    assert_eq!(finish.state, Some(RunState::Finished));
}

#[test]
fn test_prompt_frame_is_decoded() {
    let mut parser = StreamParser::new();

    let chunk = b"event: message\ndata: {\"prompt\": {\"id\": \"p\", \"type\": \"prompt\", \"message\": \"Key?\", \"fields\": [\"key\"], \"sensitive\": true}}\n\n";
    let events = parser.process(chunk);
    assert_eq!(events.len(), 1);

    let prompt = frame(&events[0]).prompt.as_ref().expect("prompt frame");
    assert_eq!(prompt.fields, vec!["key".to_string()]);
    assert!(prompt.sensitive);
}

#[test]
fn test_incomplete_tail_is_kept_for_flush() {
    let mut parser = StreamParser::new();

    assert!(parser.process(b"data: {\"run\"").is_empty());
    assert_eq!(parser.flush(), "data: {\"run\"");
    assert_eq!(parser.flush(), "");
}

#[test]
fn test_multibyte_character_split_across_chunks() {
    let mut parser = StreamParser::new();
    let event = "data: {\"call\": {\"id\": \"c1\", \"type\": \"callProgress\", \"start\": \"2024-01-01T00:00:00Z\", \"output\": [{\"content\": \"café\"}]}}\n\n";
    let bytes = event.as_bytes();
    let split = event.find('é').expect("accent") + 1;

    assert!(parser.process(&bytes[..split]).is_empty());
    let events = parser.process(&bytes[split..]);
    assert_eq!(events.len(), 1);

    let call = frame(&events[0]).call.as_ref().expect("call frame");
    assert_eq!(call.output[0].content, "café");
}
