//! Integration tests for moniker-sideband.
//!
//! These drive the full negotiate → open → run → teardown flow against the
//! in-process simulated instrument.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use moniker_sideband::codec::MsgPackCodec;
use moniker_sideband::control::{
    self, ControlChannel, JsonRpcControl, OperationShape, ResourceId, StatusCode,
};
use moniker_sideband::protocol::{build_frame, kind, FrameBuffer, Header, HEADER_SIZE};
use moniker_sideband::sim::{SimulatedInstrument, SimulatedInstrumentBuilder};
use moniker_sideband::stream;
use moniker_sideband::{
    teardown, DataShape, ElementType, MonikerGroup, SidebandConfig, SidebandError,
    SidebandSession, SidebandValues, Strategy, TypedPayload,
};

const BOUND: Duration = Duration::from_secs(5);

struct Rig {
    sim: SimulatedInstrument,
    control: JsonRpcControl,
    config: SidebandConfig,
}

async fn rig(builder: SimulatedInstrumentBuilder) -> Rig {
    let sim = builder.start().await.unwrap();
    let config = SidebandConfig::builder()
        .connect_timeout(Duration::from_secs(2))
        .control_timeout(Duration::from_secs(2))
        .build();
    let control = JsonRpcControl::new(sim.control_addr(), &config);
    Rig {
        sim,
        control,
        config,
    }
}

/// Input and output resources, one read moniker and one write moniker.
async fn loop_group(rig: &Rig, read: DataShape, write: DataShape) -> (MonikerGroup, Vec<ResourceId>) {
    let input = control::create_and_start(&rig.control, "Dev1/ai0").await.unwrap();
    let output = control::create_and_start(&rig.control, "Dev1/ao0").await.unwrap();

    let mut group = MonikerGroup::new();
    group
        .add_read(
            control::begin_read(&rig.control, &input, &OperationShape::new(read))
                .await
                .unwrap(),
        )
        .unwrap();
    group
        .add_write(
            control::begin_write(&rig.control, &output, &OperationShape::new(write))
                .await
                .unwrap(),
        )
        .unwrap();
    (group, vec![input, output])
}

fn scalar_f64() -> DataShape {
    DataShape::scalar(ElementType::F64)
}

/// Test the MsgPack batch travels intact through a frame.
#[test]
fn test_frame_with_batch_payload() {
    let batch = SidebandValues::new(vec![
        TypedPayload::scalar(1.0f64),
        TypedPayload::from(vec![1i64, 2, 3]),
    ]);
    let body = MsgPackCodec::encode(&batch).unwrap();
    let bytes = build_frame(&Header::new(kind::WRITE, 7, body.len() as u32), &body);
    assert_eq!(bytes.len(), HEADER_SIZE + body.len());

    let frames = FrameBuffer::new().push(&bytes).unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].sequence(), 7);

    let decoded: SidebandValues = MsgPackCodec::decode(frames[0].payload()).unwrap();
    assert_eq!(decoded, batch);
}

#[tokio::test]
async fn test_first_receive_matches_read_set() {
    let rig = rig(SimulatedInstrument::builder()).await;
    let rpc = &rig.control;

    let input = control::create_and_start(rpc, "Dev1/ai0").await.unwrap();
    let output = control::create_and_start(rpc, "Dev1/ao0").await.unwrap();
    let read_shapes = [
        DataShape::scalar(ElementType::F64),
        DataShape::array(ElementType::I32, 3),
        DataShape::array(ElementType::U8, 16),
    ];

    let mut group = MonikerGroup::new();
    for shape in read_shapes {
        let moniker = control::begin_read(rpc, &input, &OperationShape::new(shape))
            .await
            .unwrap();
        group.add_read(moniker).unwrap();
    }
    let write = control::begin_write(rpc, &output, &OperationShape::new(scalar_f64()))
        .await
        .unwrap();
    group.add_write(write).unwrap();

    let session = SidebandSession::establish(rpc, group, Strategy::Sockets, &rig.config)
        .await
        .unwrap();
    let batch = session
        .iterate(vec![TypedPayload::scalar(2.5f64)])
        .await
        .unwrap();

    assert_eq!(batch.len(), read_shapes.len());
    for (slot, shape) in read_shapes.iter().enumerate() {
        assert!(batch.get(slot).unwrap().matches(shape), "slot {slot}");
    }
    assert_eq!(batch.slot::<f64>(0).unwrap(), &[2.5]);
    assert_eq!(batch.slot::<i32>(1).unwrap(), &[0, 0, 0]);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_binding_is_positional() {
    for swapped in [false, true] {
        let rig = rig(SimulatedInstrument::builder()).await;
        let rpc = &rig.control;
        let output = control::create_and_start(rpc, "Dev1/ao0").await.unwrap();
        let shape = OperationShape::new(scalar_f64());

        let a = control::begin_write(rpc, &output, &shape).await.unwrap();
        let b = control::begin_write(rpc, &output, &shape).await.unwrap();
        let (a_id, b_id) = (a.data_instance(), b.data_instance());

        let mut group = MonikerGroup::new();
        if swapped {
            group.add_write(b).unwrap().add_write(a).unwrap();
        } else {
            group.add_write(a).unwrap().add_write(b).unwrap();
        }

        let session = SidebandSession::establish(rpc, group, Strategy::Sockets, &rig.config)
            .await
            .unwrap();
        let batch = session
            .iterate(vec![TypedPayload::scalar(10.0f64), TypedPayload::scalar(20.0f64)])
            .await
            .unwrap();
        assert!(batch.is_empty());
        session.close().await.unwrap();

        let (first, second) = if swapped { (b_id, a_id) } else { (a_id, b_id) };
        assert_eq!(rig.sim.recorded_writes(first), vec![TypedPayload::scalar(10.0f64)]);
        assert_eq!(rig.sim.recorded_writes(second), vec![TypedPayload::scalar(20.0f64)]);
    }
}

#[tokio::test]
async fn test_close_twice() {
    let rig = rig(SimulatedInstrument::builder()).await;
    let (group, _) = loop_group(&rig, scalar_f64(), scalar_f64()).await;
    let session = SidebandSession::establish(&rig.control, group, Strategy::Sockets, &rig.config)
        .await
        .unwrap();

    tokio::time::timeout(BOUND, session.close())
        .await
        .unwrap()
        .unwrap();
    tokio::time::timeout(BOUND, session.close())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_cancel_then_close_without_reply() {
    let rig = rig(SimulatedInstrument::builder().stall_reads(true)).await;
    let (group, _) = loop_group(&rig, scalar_f64(), scalar_f64()).await;
    let session = SidebandSession::establish(&rig.control, group, Strategy::Sockets, &rig.config)
        .await
        .unwrap();

    session.send(vec![TypedPayload::scalar(1.0f64)]).await.unwrap();

    tokio::time::timeout(BOUND, async {
        session.cancel().await.unwrap();
        session.close().await.unwrap();
    })
    .await
    .expect("cancel and close must not hang");

    // Cancel is delivered before the socket closes
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(rig.sim.cancels_observed(), 1);
}

#[tokio::test]
async fn test_concurrent_close_unblocks_receive() {
    let rig = rig(SimulatedInstrument::builder().stall_reads(true)).await;
    let (group, _) = loop_group(&rig, scalar_f64(), scalar_f64()).await;
    let session = Arc::new(
        SidebandSession::establish(&rig.control, group, Strategy::SocketsLowLatency, &rig.config)
            .await
            .unwrap(),
    );

    session.send(vec![TypedPayload::scalar(1.0f64)]).await.unwrap();
    let pending = {
        let session = session.clone();
        tokio::spawn(async move { session.receive().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    session.close().await.unwrap();

    let result = tokio::time::timeout(BOUND, pending)
        .await
        .expect("receive must be unblocked by close")
        .unwrap();
    assert!(matches!(result, Err(SidebandError::TransportClosed)));
}

#[tokio::test]
async fn test_scalar_float_loop() {
    let rig = rig(SimulatedInstrument::builder()).await;
    let (group, resources) = loop_group(&rig, scalar_f64(), scalar_f64()).await;
    let session = SidebandSession::establish(&rig.control, group, Strategy::Sockets, &rig.config)
        .await
        .unwrap();

    let batches: Vec<_> = session
        .run(5, stream::repeat(vec![TypedPayload::scalar(1.0f64)]))
        .collect()
        .await;

    assert_eq!(batches.len(), 5);
    for (i, batch) in batches.into_iter().enumerate() {
        let batch = batch.unwrap();
        assert_eq!(batch.iteration(), i + 1);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.slot::<f64>(0).unwrap(), &[1.0]);
    }

    let report = teardown(&session, &rig.control, &resources).await;
    assert!(report.is_clean(), "{report:?}");
    assert!(rig.sim.live_resources().is_empty());
}

#[tokio::test]
async fn test_int64_array_loop() {
    let rig = rig(SimulatedInstrument::builder()).await;
    let (group, resources) = loop_group(
        &rig,
        DataShape::array(ElementType::I64, 4),
        DataShape::array(ElementType::I64, 8),
    )
    .await;
    let session =
        SidebandSession::establish(&rig.control, group, Strategy::SocketsLowLatency, &rig.config)
            .await
            .unwrap();

    let mut batches = session.run(3, |_: usize| vec![TypedPayload::from(vec![1i64; 8])]);
    let mut seen = 0;
    while let Some(batch) = batches.next().await {
        let batch = batch.unwrap();
        assert_eq!(batch.slot::<i64>(0).unwrap(), &[1, 1, 1, 1]);
        seen += 1;
    }
    drop(batches);
    assert_eq!(seen, 3);

    teardown(&session, &rig.control, &resources)
        .await
        .into_result()
        .unwrap();
}

#[tokio::test]
async fn test_iteration_numbers_continue_across_iterate_and_run() {
    let rig = rig(SimulatedInstrument::builder()).await;
    let (group, _) = loop_group(&rig, scalar_f64(), scalar_f64()).await;
    let session = SidebandSession::establish(&rig.control, group, Strategy::Sockets, &rig.config)
        .await
        .unwrap();
    let write = || vec![TypedPayload::scalar(1.0f64)];

    let first = session.iterate(write()).await.unwrap();
    assert_eq!(first.iteration(), 1);

    let mut provided = Vec::new();
    let looped: Vec<usize> = session
        .run(2, |i: usize| {
            provided.push(i);
            vec![TypedPayload::scalar(i as f64)]
        })
        .map(|batch| batch.unwrap().iteration())
        .collect()
        .await;
    assert_eq!(looped, vec![2, 3]);
    assert_eq!(provided, vec![2, 3]);

    let last = session.iterate(write()).await.unwrap();
    assert_eq!(last.iteration(), 4);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_loop_stops_at_first_error() {
    let rig = rig(SimulatedInstrument::builder()).await;
    let (group, _) = loop_group(&rig, scalar_f64(), scalar_f64()).await;
    let session = SidebandSession::establish(&rig.control, group, Strategy::Sockets, &rig.config)
        .await
        .unwrap();

    // Second iteration writes the wrong element type
    let results: Vec<_> = session
        .run(4, |i: usize| {
            if i == 2 {
                vec![TypedPayload::scalar(1i64)]
            } else {
                vec![TypedPayload::scalar(1.0f64)]
            }
        })
        .collect()
        .await;

    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(matches!(
        results[1],
        Err(SidebandError::EncodeMismatch { slot: 0, .. })
    ));
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_unsupported_strategy_is_unimplemented() {
    let rig = rig(SimulatedInstrument::builder().strategies(&[Strategy::Sockets])).await;
    let (group, _) = loop_group(&rig, scalar_f64(), scalar_f64()).await;

    let err = SidebandSession::establish(
        &rig.control,
        group,
        Strategy::SocketsLowLatency,
        &rig.config,
    )
    .await
    .unwrap_err();

    match err {
        SidebandError::Negotiation(status) => {
            assert_eq!(status.code, StatusCode::Unimplemented);
            assert!(status.diagnostic().contains("not implemented"));
        }
        other => panic!("expected negotiation error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_control_channel() {
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let config = SidebandConfig::default();
    let control = JsonRpcControl::new(addr, &config);

    let err = SidebandSession::establish(&control, MonikerGroup::new(), Strategy::Sockets, &config)
        .await
        .unwrap_err();
    let status = err.status().expect("negotiation carries a status");
    assert!(matches!(err, SidebandError::Negotiation(_)));
    assert!(status.is_unavailable());
}

#[tokio::test]
async fn test_use_after_close() {
    let rig = rig(SimulatedInstrument::builder()).await;
    let (group, _) = loop_group(&rig, scalar_f64(), scalar_f64()).await;
    let session = SidebandSession::establish(&rig.control, group, Strategy::Sockets, &rig.config)
        .await
        .unwrap();
    session.close().await.unwrap();

    let err = session
        .send(vec![TypedPayload::scalar(1.0f64)])
        .await
        .unwrap_err();
    assert!(matches!(err, SidebandError::UseAfterClose { operation: "send" }));

    let err = session.receive().await.unwrap_err();
    assert!(matches!(err, SidebandError::UseAfterClose { .. }));
}

#[tokio::test]
async fn test_teardown_continues_past_failed_steps() {
    let rig = rig(SimulatedInstrument::builder()).await;
    let (group, resources) = loop_group(&rig, scalar_f64(), scalar_f64()).await;
    let session = SidebandSession::establish(&rig.control, group, Strategy::Sockets, &rig.config)
        .await
        .unwrap();

    // Clear one resource early so its teardown steps fail
    rig.control.clear(&resources[0]).await.unwrap();
    session.close_handle().close();

    let report = teardown(&session, &rig.control, &resources).await;
    assert!(report.cancel.is_ok());
    assert!(report.close.is_ok());
    assert_eq!(report.resources.len(), 2);
    assert!(report.resources[0].stop.is_err());
    assert!(report.resources[1].stop.is_ok());
    assert!(report.resources[1].clear.is_ok());
    assert!(rig.sim.live_resources().is_empty());

    let err = report.into_result().unwrap_err();
    assert_eq!(err.status().unwrap().code, StatusCode::NotFound);
}

#[cfg(unix)]
#[tokio::test]
async fn test_unix_sideband() {
    let rig = rig(SimulatedInstrument::builder().unix_sideband(true)).await;
    assert!(rig.sim.sideband_url().starts_with("unix:"));

    let (group, _) = loop_group(&rig, scalar_f64(), scalar_f64()).await;
    let session = SidebandSession::establish(&rig.control, group, Strategy::Sockets, &rig.config)
        .await
        .unwrap();
    let batch = session
        .iterate(vec![TypedPayload::scalar(4.0f64)])
        .await
        .unwrap();
    assert_eq!(batch.slot::<f64>(0).unwrap(), &[4.0]);
    session.close().await.unwrap();
}
