use std::time::Instant;
use uslpbus::epp::{EppHeader, PROTOCOL_ID_IPE, PROTOCOL_ID_PRIVATE};
use uslpbus::protocol::*;
use uslpbus::stack::frame::{self, ConstructionRule, FrameHeader};
use uslpbus::stack::output::MAX_QUEUED_SDUS;
use uslpbus::stack::*;
use uslpbus::*;

const TC: ChannelId = ChannelId::new(SPACECRAFT_ID, UPLINK_VCHANNEL_ID, UPLINK_TELECOMMAND_MAPID);
const IP: ChannelId = ChannelId::new(SPACECRAFT_ID, UPLINK_VCHANNEL_ID, UPLINK_IP_MAPID);

fn drain_frames(stack: &mut MuxStack) -> Vec<(FrameParams, Vec<u8>)> {
    let mut frames = Vec::new();
    while stack.peek_frame().is_some() {
        let mut buf = vec![0u8; stack.frame_size()];
        let params = stack.pop_frame(&mut buf).unwrap();
        frames.push((params, buf));
    }
    frames
}

fn demux(stack: &mut DemuxStack, frames: &[(FrameParams, Vec<u8>)]) -> Vec<MapSduEvent> {
    let mut events = Vec::new();
    for (_, data) in frames {
        stack.push_frame(data, &mut |event| events.push(event)).unwrap();
    }
    events
}

#[test]
fn test_small_packet_fits_one_frame() {
    let mut output = ground_output_stack();
    let packet = EppHeader::wrap(PROTOCOL_ID_PRIVATE, b"telecommand").unwrap();

    output.submit_sdu(TC, 11, &packet, Qos::Expedited).unwrap();
    let peeked = output.peek_frame().unwrap();
    let frames = drain_frames(&mut output);

    assert_eq!(frames.len(), 1);
    let (params, data) = &frames[0];
    assert_eq!(params, &peeked);
    assert_eq!(params.channel_id, TC);
    assert_eq!(params.payload_cookies.as_slice(), &[PayloadPartCookie::whole(11)]);
    assert_eq!(data.len(), RADIO_FRAME_SIZE);

    // Expedited frames carry no sequence number
    assert!(params.frame_seq_no.is_none());
}

#[test]
fn test_large_sdu_is_segmented_and_reassembled() {
    let mut output = ground_output_stack();
    let mut input = ground_input_stack();

    let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    let packet = EppHeader::wrap(PROTOCOL_ID_IPE, &payload).unwrap();
    output.submit_sdu(IP, 77, &packet, Qos::SequenceControlled).unwrap();

    let frames = drain_frames(&mut output);
    let capacity = frame::data_capacity(RADIO_FRAME_SIZE);
    assert_eq!(frames.len(), packet.len().div_ceil(capacity));

    // One part per frame, numbered in order, only the last one final
    for (index, (params, _)) in frames.iter().enumerate() {
        assert_eq!(params.payload_cookies.len(), 1);
        let part = params.payload_cookies[0];
        assert_eq!(part.cookie, 77);
        assert_eq!(part.part_no, index as u32);
        assert_eq!(part.is_final, index == frames.len() - 1);
        assert_eq!(params.frame_seq_no, Some(index as u16));
    }

    let events = demux(&mut input, &frames);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].qos, Qos::SequenceControlled);
    assert_eq!(events[0].flags, SduFlags::MAPP);
    assert_eq!(events[0].data, packet);
}

#[test]
fn test_expedited_overtakes_sequenced() {
    let mut output = ground_output_stack();
    let slow = EppHeader::wrap(PROTOCOL_ID_PRIVATE, b"slow").unwrap();
    let fast = EppHeader::wrap(PROTOCOL_ID_PRIVATE, b"fast").unwrap();

    output.submit_sdu(TC, 1, &slow, Qos::SequenceControlled).unwrap();
    output.submit_sdu(TC, 2, &fast, Qos::Expedited).unwrap();

    let frames = drain_frames(&mut output);
    let cookies: Vec<u64> = frames.iter().map(|(params, _)| params.payload_cookies[0].cookie).collect();
    assert_eq!(cookies, vec![2, 1]);
}

#[test]
fn test_expedited_does_not_split_a_segmented_sdu() {
    let mut output = ground_output_stack();
    let mut input = ground_input_stack();

    let long = EppHeader::wrap(PROTOCOL_ID_PRIVATE, &[0x3C; 500]).unwrap();
    output.submit_sdu(TC, 1, &long, Qos::SequenceControlled).unwrap();
    let mut buf = vec![0u8; RADIO_FRAME_SIZE];
    let first = output.pop_frame(&mut buf).unwrap();
    let mut frames = vec![(first, buf)];

    let short = EppHeader::wrap(PROTOCOL_ID_PRIVATE, b"abort").unwrap();
    output.submit_sdu(TC, 2, &short, Qos::Expedited).unwrap();
    frames.extend(drain_frames(&mut output));

    let events = demux(&mut input, &frames);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].qos, Qos::SequenceControlled);
    assert_eq!(events[0].flags, SduFlags::MAPP);
    assert_eq!(events[0].data, long);
    assert_eq!(events[1].qos, Qos::Expedited);
    assert_eq!(events[1].flags, SduFlags::MAPP);
    assert_eq!(events[1].data, short);
}

#[test]
fn test_channels_are_served_round_robin() {
    let mut output = ground_output_stack();
    let packet = EppHeader::wrap(PROTOCOL_ID_PRIVATE, b"x").unwrap();

    for cookie in 0..2 {
        output.submit_sdu(TC, cookie, &packet, Qos::Expedited).unwrap();
        output.submit_sdu(IP, 10 + cookie, &packet, Qos::Expedited).unwrap();
    }

    let channels: Vec<ChannelId> = drain_frames(&mut output).iter().map(|(params, _)| params.channel_id).collect();
    assert_eq!(channels, vec![TC, IP, TC, IP]);
}

#[test]
fn test_submit_rejections() {
    let mut output = ground_output_stack();

    // Unknown channel
    let other = ChannelId::new(SPACECRAFT_ID, 0, 9);
    let packet = EppHeader::wrap(PROTOCOL_ID_PRIVATE, b"x").unwrap();
    assert_eq!(
        output.submit_sdu(other, 1, &packet, Qos::Expedited),
        Err(StackError::UnknownChannel(other))
    );

    // Packet channels only take whole encapsulation packets
    assert!(matches!(
        output.submit_sdu(TC, 1, b"raw bytes", Qos::Expedited),
        Err(StackError::InvalidSdu(_))
    ));
    let mut truncated = packet.clone();
    truncated.push(0);
    assert!(matches!(
        output.submit_sdu(TC, 1, &truncated, Qos::Expedited),
        Err(StackError::InvalidSdu(_))
    ));

    assert!(matches!(output.submit_sdu(TC, 1, &[], Qos::Expedited), Err(StackError::InvalidSdu(_))));
}

#[test]
fn test_full_channel_queue_rejects() {
    let mut output = ground_output_stack();
    let packet = EppHeader::wrap(PROTOCOL_ID_PRIVATE, b"x").unwrap();

    for cookie in 0..MAX_QUEUED_SDUS as u64 {
        output.submit_sdu(TC, cookie, &packet, Qos::Expedited).unwrap();
    }
    assert_eq!(
        output.submit_sdu(TC, 999, &packet, Qos::Expedited),
        Err(StackError::ChannelFull(TC))
    );

    // The other queue of the same channel still has room
    assert!(output.submit_sdu(TC, 1000, &packet, Qos::SequenceControlled).is_ok());
    assert_eq!(output.queued_sdus(TC), MAX_QUEUED_SDUS + 1);
}

#[test]
fn test_pop_needs_exact_frame_size() {
    let mut output = ground_output_stack();
    let packet = EppHeader::wrap(PROTOCOL_ID_PRIVATE, b"x").unwrap();
    output.submit_sdu(TC, 1, &packet, Qos::Expedited).unwrap();

    let mut short = vec![0u8; RADIO_FRAME_SIZE - 1];
    assert_eq!(
        output.pop_frame(&mut short),
        Err(StackError::FrameSizeMismatch { expected: RADIO_FRAME_SIZE, given: RADIO_FRAME_SIZE - 1 })
    );

    let mut empty = MuxStack::new(RADIO_FRAME_SIZE);
    let mut buf = vec![0u8; RADIO_FRAME_SIZE];
    assert_eq!(empty.pop_frame(&mut buf), Err(StackError::NoFrameReady));
}

fn raw_frame(channel_id: ChannelId, seq_no: Option<u16>, rule: ConstructionRule, upid: u8, data: &[u8]) -> Vec<u8> {
    let header = FrameHeader {
        channel_id,
        bypass: seq_no.is_none(),
        seq_no,
        rule,
        upid,
        data_len: data.len() as u16,
    };
    let mut buf = vec![0u8; 64];
    frame::encode(&header, data, &mut buf).unwrap();
    buf
}

fn push(input: &mut DemuxStack, frame: &[u8]) -> Vec<MapSduEvent> {
    let mut events = Vec::new();
    input.push_frame(frame, &mut |event| events.push(event)).unwrap();
    events
}

#[test]
fn test_sequence_gap_marks_sdu_corrupted() {
    let mut input = DemuxStack::new(SPACECRAFT_ID);
    input.add_map_channel(TC, MapKind::Access);

    assert!(push(&mut input, &raw_frame(TC, Some(4), ConstructionRule::SegmentStart, frame::UPID_MAPA_SDU, b"ab")).is_empty());
    // frame 5 got lost
    let events = push(&mut input, &raw_frame(TC, Some(6), ConstructionRule::SegmentLast, frame::UPID_MAPA_SDU, b"ef"));

    assert_eq!(events.len(), 1);
    assert!(events[0].flags.contains(SduFlags::INCOMPLETE));
    assert!(events[0].flags.contains(SduFlags::CORRUPTED));
    assert!(events[0].flags.contains(SduFlags::MAPA));
    assert_eq!(events[0].data, b"abef");
}

#[test]
fn test_continuation_without_start_is_incomplete() {
    let mut input = DemuxStack::new(SPACECRAFT_ID);
    input.add_map_channel(TC, MapKind::Access);

    let events = push(&mut input, &raw_frame(TC, None, ConstructionRule::SegmentLast, frame::UPID_MAPA_SDU, b"tail"));

    assert_eq!(events.len(), 1);
    assert!(events[0].flags.contains(SduFlags::INCOMPLETE));
    assert_eq!(events[0].data, b"tail");
}

#[test]
fn test_new_start_flushes_unfinished_sdu() {
    let mut input = DemuxStack::new(SPACECRAFT_ID);
    input.add_map_channel(TC, MapKind::Access);

    push(&mut input, &raw_frame(TC, None, ConstructionRule::SegmentStart, frame::UPID_MAPA_SDU, b"one"));
    let events = push(&mut input, &raw_frame(TC, None, ConstructionRule::Unsegmented, frame::UPID_MAPA_SDU, b"two"));

    assert_eq!(events.len(), 2);
    assert!(events[0].flags.contains(SduFlags::INCOMPLETE));
    assert_eq!(events[0].data, b"one");
    assert!(!events[1].flags.contains(SduFlags::INCOMPLETE));
    assert_eq!(events[1].data, b"two");
}

#[test]
fn test_foreign_idle_and_stray_frames() {
    let mut input = DemuxStack::new(SPACECRAFT_ID);
    input.add_map_channel(TC, MapKind::Access);

    // Another spacecraft
    let foreign = ChannelId::new(SPACECRAFT_ID + 1, 0, 0);
    assert!(push(&mut input, &raw_frame(foreign, None, ConstructionRule::Unsegmented, frame::UPID_MAPA_SDU, b"x")).is_empty());

    // Idle frames are dropped unless asked for
    let idle = raw_frame(TC, None, ConstructionRule::Unsegmented, frame::UPID_IDLE, b"");
    assert!(push(&mut input, &idle).is_empty());
    input.emit_idle(true);
    let events = push(&mut input, &idle);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].flags, SduFlags::IDLE);

    // Unknown MAP
    let stray = ChannelId::new(SPACECRAFT_ID, 0, 7);
    let events = push(&mut input, &raw_frame(stray, None, ConstructionRule::Unsegmented, frame::UPID_MAPA_SDU, b"?"));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].channel_id, stray);
    assert!(events[0].flags.contains(SduFlags::STRAY));
}

#[test]
fn test_garbage_frame_is_an_error() {
    let mut input = ground_input_stack();
    let result = input.push_frame(&[0u8; 20], &mut |_| panic!("no sdu expected"));
    assert!(matches!(result, Err(StackError::BadFrame(_))));
}

#[test]
fn test_downlink_loopback_strips_epp_header() {
    // Frames built by an uplink stack on the downlink channel plan
    let downlink = ChannelId::new(SPACECRAFT_ID, DOWNLINK_VCHANNEL_ID, DOWNLINK_TELEMETRY_MAPID);
    let mut encoder = MuxStack::new(RADIO_FRAME_SIZE);
    encoder.add_map_channel(downlink, MapKind::Packet);

    let payload = vec![0xA5; 450];
    let packet = EppHeader::wrap(PROTOCOL_ID_PRIVATE, &payload).unwrap();
    encoder.submit_sdu(downlink, 1, &packet, Qos::SequenceControlled).unwrap();
    let frames = drain_frames(&mut encoder);
    assert!(frames.len() > 1);

    let mut dispatcher = Dispatcher::new(ground_output_stack(), ground_input_stack(), DispatcherConfig::default());
    let now = Instant::now();
    for (frame_no, (_, data)) in frames.into_iter().enumerate() {
        dispatcher.dispatch(
            InboundMessage::RadioDownlinkFrame(RadioDownlinkFrame {
                checksum_valid: true,
                frame_no: frame_no as u64,
                cookie: frame_no as u64 + 100,
                data,
            }),
            now,
        );
    }

    let out = dispatcher.take_outbound();
    assert_eq!(out.len(), 1);
    match &out[0] {
        OutboundMessage::SduDownlink(sdu) => {
            assert_eq!(sdu.channel_id, downlink);
            assert_eq!(sdu.qos, Qos::SequenceControlled);
            assert!(sdu.flags.contains(SduFlags::MAPP));
            assert_eq!(sdu.data, payload);
        }
        other => panic!("Expected downlink sdu, got {:?}", other),
    }
    assert_eq!(dispatcher.stats().downlink_sdus, 1);
}

#[test]
fn test_uplink_through_ground_stacks() {
    let mut dispatcher = Dispatcher::new(ground_output_stack(), ground_input_stack(), DispatcherConfig::default());
    let now = Instant::now();

    let packet = EppHeader::wrap(PROTOCOL_ID_IPE, &[0x45; 300]).unwrap();
    dispatcher.dispatch(
        InboundMessage::SduUplinkRequest(SduUplinkRequest { channel_id: IP, qos: Qos::Expedited, cookie: 5, data: packet }),
        now,
    );
    dispatcher.dispatch(InboundMessage::RadioUplinkState(RadioUplinkState::default()), now);

    let out = dispatcher.take_outbound();
    let frame = out
        .iter()
        .find_map(|message| match message {
            OutboundMessage::RadioUplinkFrame(frame) => Some(frame),
            _ => None,
        })
        .expect("a frame for the radio");
    assert_eq!(frame.data.len(), RADIO_FRAME_SIZE);
    assert_eq!(dispatcher.output_stack().queued_sdus(IP), 1);
}
