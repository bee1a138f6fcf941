use std::io::IsTerminal;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use ads_driver::testing::{FIRST_NOTIFICATION_HANDLE, FIRST_SYMBOL_HANDLE, MockPlc};
use ads_driver::{
    ArrayInfo, Connection, ConnectionConfig, DataTypeEntry, Error, PlcValue, ReadRequest,
    ResolveError, ResponseCode, ReturnCode, SubscriptionOptions, SymbolEntry, SymbolResolution,
    TagError, TransmissionMode, WriteRequest,
};
use ads_transport::index_group::{
    ADSIGRP_MULTIPLE_READ, ADSIGRP_SYM_HNDBYNAME, ADSIGRP_SYM_RELEASEHND, ADSIGRP_SYM_VALBYHND,
};
use ads_transport::testing::frame_packet;
use ads_transport::{AdsPayload, AmsPacket};
use bytes::Bytes;
use eyre::WrapErr;
use tracing_subscriber::EnvFilter;

const FILETIME_ONE_SECOND_AFTER_EPOCH: u64 = 116_444_736_000_000_000 + 10_000_000;

// test suite "constructor"
#[ctor::ctor]
fn init() {
    let in_ci = std::env::var("CI")
        .map(|val| val == "true")
        .unwrap_or(false);

    if std::io::stderr().is_terminal() || in_ci {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .json()
            .try_init();
    }

    // error traces
    let _ = color_eyre::install();
}

fn symbols() -> Vec<SymbolEntry> {
    vec![
        SymbolEntry::new("MAIN.counter", 0x4040, 0, 2, "INT"),
        SymbolEntry::new("MAIN.motor", 0x4040, 100, 16, "ST_Motor"),
        SymbolEntry::new("MAIN.name", 0x4040, 200, 81, "STRING(80)"),
        SymbolEntry::new("MAIN.values", 0x4040, 300, 20, "ARRAY [0..9] OF INT"),
    ]
}

fn data_types() -> Vec<DataTypeEntry> {
    vec![
        DataTypeEntry::structure(
            "ST_Motor",
            16,
            vec![
                DataTypeEntry::member("running", "BOOL", 0, 1),
                DataTypeEntry::member("speed", "REAL", 4, 4),
                DataTypeEntry::member("pos", "ST_Pos", 8, 8),
            ],
        ),
        DataTypeEntry::structure(
            "ST_Pos",
            8,
            vec![
                DataTypeEntry::member("x", "DINT", 0, 4),
                DataTypeEntry::member("y", "DINT", 4, 4),
            ],
        ),
        DataTypeEntry::array(
            "ARRAY [0..9] OF INT",
            "INT",
            20,
            vec![ArrayInfo::new(0, 10).unwrap()],
        ),
    ]
}

fn config() -> ConnectionConfig {
    ConnectionConfig::new(
        "192.168.1.10.1.1".parse().unwrap(),
        "192.168.1.100.1.1".parse().unwrap(),
    )
}

/// A connected driver with the symbol upload already done and cleared from
/// the request log.
async fn connect(config: ConnectionConfig) -> eyre::Result<(MockPlc, Connection)> {
    let (plc, transport) = MockPlc::start(symbols(), data_types());
    let connection = Connection::from_transport(transport, config)
        .await
        .context("connecting to mock plc")?;
    plc.clear_requests();
    Ok((plc, connection))
}

fn is_handle_request(packet: &AmsPacket) -> bool {
    matches!(
        packet.payload,
        AdsPayload::ReadWriteRequest {
            index_group: ADSIGRP_SYM_HNDBYNAME,
            ..
        }
    )
}

fn is_plain_read(packet: &AmsPacket) -> bool {
    matches!(packet.payload, AdsPayload::ReadRequest { .. })
}

fn is_sum_read(packet: &AmsPacket) -> bool {
    matches!(
        packet.payload,
        AdsPayload::ReadWriteRequest {
            index_group: ADSIGRP_MULTIPLE_READ,
            ..
        }
    )
}

#[tokio::test]
async fn connect_downloads_symbol_tables() -> eyre::Result<()> {
    let (plc, transport) = MockPlc::start(symbols(), data_types());
    let connection = Connection::from_transport(transport, config()).await?;

    assert_eq!(plc.count_requests(is_plain_read), 3);
    let context = connection.context();
    assert!(context.symbol("MAIN.counter").is_some());
    assert!(context.data_type("ST_Motor").is_some());
    Ok(())
}

#[tokio::test]
async fn symbolic_read_acquires_handle_once() -> eyre::Result<()> {
    let (plc, connection) = connect(config()).await?;
    plc.set_memory(0x4040, 0, &1234i16.to_le_bytes());

    let value = connection.read_tag("MAIN.counter").await?;
    assert_eq!(value, PlcValue::Int(1234));

    let requests = plc.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[0].payload,
        AdsPayload::ReadWriteRequest {
            index_group: ADSIGRP_SYM_HNDBYNAME,
            index_offset: 0,
            read_length: 4,
            data: Bytes::from_static(b"MAIN.counter"),
        }
    );
    assert_eq!(
        requests[1].payload,
        AdsPayload::ReadRequest {
            index_group: ADSIGRP_SYM_VALBYHND,
            index_offset: FIRST_SYMBOL_HANDLE,
            length: 2,
        }
    );

    plc.set_memory(0x4040, 0, &5678i16.to_le_bytes());
    assert_eq!(connection.read_tag("MAIN.counter").await?, PlcValue::Int(5678));
    assert_eq!(plc.count_requests(is_handle_request), 1);
    assert_eq!(connection.cached_tags(), 1);
    Ok(())
}

#[tokio::test]
async fn direct_write_issues_single_request() -> eyre::Result<()> {
    let (plc, connection) = connect(config()).await?;

    let response = connection
        .write(WriteRequest::new().add_address("flag", "1234/5678:BOOL", PlcValue::Bool(true))?)
        .await?;
    assert_eq!(response.code("flag"), Some(ResponseCode::Ok));

    let requests = plc.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].payload,
        AdsPayload::WriteRequest {
            index_group: 1234,
            index_offset: 5678,
            data: Bytes::from_static(&[1]),
        }
    );
    assert_eq!(plc.memory(1234, 5678, 1), vec![1]);
    Ok(())
}

#[tokio::test]
async fn symbolic_write_goes_through_handle() -> eyre::Result<()> {
    let (plc, connection) = connect(config()).await?;

    connection.write_tag("MAIN.counter", PlcValue::Int(-5)).await?;
    assert_eq!(plc.memory(0x4040, 0, 2), (-5i16).to_le_bytes().to_vec());
    assert_eq!(plc.count_requests(is_handle_request), 1);
    Ok(())
}

#[tokio::test]
async fn concurrent_first_resolution_is_coalesced() -> eyre::Result<()> {
    let (plc, connection) = connect(config()).await?;
    plc.set_memory(0x4040, 104, &1.5f32.to_le_bytes());

    let (a, b, c) = tokio::join!(
        connection.read_tag("MAIN.motor.speed"),
        connection.read_tag("MAIN.motor.speed"),
        connection.read_tag("MAIN.motor.speed"),
    );
    for value in [a?, b?, c?] {
        assert_eq!(value, PlcValue::Real(1.5));
    }
    assert_eq!(plc.count_requests(is_handle_request), 1);
    Ok(())
}

#[tokio::test]
async fn timeout_affects_only_unanswered_request() -> eyre::Result<()> {
    let (plc, connection) =
        connect(config().with_request_timeout(Duration::from_millis(200))).await?;
    plc.set_memory(0x4040, 0, &7i16.to_le_bytes());
    plc.ignore_requests(|packet| {
        matches!(
            packet.payload,
            AdsPayload::ReadRequest {
                index_group: 0x4020,
                ..
            }
        )
    });

    let (lost, answered) = tokio::join!(
        connection.read_tag("0x4020/0:INT"),
        connection.read_tag("0x4040/0:INT"),
    );
    assert!(matches!(lost, Err(Error::Timeout { .. })), "{lost:?}");
    assert_eq!(answered?, PlcValue::Int(7));
    assert_eq!(connection.pending_requests(), 0);

    plc.answer_all_requests();
    assert_eq!(connection.read_tag("0x4020/0:INT").await?, PlcValue::Int(0));
    Ok(())
}

#[tokio::test]
async fn caller_deadline_frees_the_request() -> eyre::Result<()> {
    let (plc, connection) =
        connect(config().with_request_timeout(Duration::from_secs(30))).await?;
    plc.set_memory(0x4040, 0, &3i16.to_le_bytes());
    plc.ignore_requests(|packet| {
        matches!(
            packet.payload,
            AdsPayload::ReadRequest {
                index_group: 0x4020,
                ..
            }
        )
    });

    let (abandoned, answered) = tokio::join!(
        tokio::time::timeout(
            Duration::from_millis(50),
            connection.read_tag("0x4020/0:INT")
        ),
        connection.read_tag("0x4040/0:INT"),
    );
    assert!(abandoned.is_err());
    assert_eq!(answered?, PlcValue::Int(3));
    assert_eq!(connection.pending_requests(), 0);
    assert!(!connection.is_closed());
    Ok(())
}

#[tokio::test]
async fn malformed_frame_does_not_break_connection() -> eyre::Result<()> {
    let (plc, connection) = connect(config()).await?;
    plc.set_memory(0x4020, 0, &[1]);

    // a three byte body cannot hold an AMS header
    plc.inject_raw(&[0, 0, 3, 0, 0, 0, 0xde, 0xad, 0xbe]).await;

    assert_eq!(connection.read_tag("0x4020/0:BOOL").await?, PlcValue::Bool(true));
    assert!(!connection.is_closed());
    Ok(())
}

#[tokio::test]
async fn malformed_response_fails_its_request() -> eyre::Result<()> {
    let (plc, connection) =
        connect(config().with_request_timeout(Duration::from_secs(30))).await?;
    plc.set_memory(0x4020, 0, &9i16.to_le_bytes());
    plc.truncate_responses(|packet| {
        matches!(
            packet.payload,
            AdsPayload::ReadRequest {
                index_group: 0x4020,
                ..
            }
        )
    });

    let err = connection.read_tag("0x4020/0:INT").await.unwrap_err();
    assert!(
        matches!(err, Error::Decode(ref e) if e.response_invoke_id().is_some()),
        "{err:?}"
    );
    assert_eq!(connection.pending_requests(), 0);

    plc.answer_all_requests();
    assert_eq!(connection.read_tag("0x4020/0:INT").await?, PlcValue::Int(9));
    assert!(!connection.is_closed());
    Ok(())
}

#[tokio::test]
async fn oversize_tags_fail_without_traffic() -> eyre::Result<()> {
    let (plc, connection) = connect(config()).await?;

    for address in ["1/2:INT[4294967295]", "1/2:STRING(4294967295)"] {
        assert!(
            matches!(
                connection.read_tag(address).await,
                Err(Error::Tag(TagError::TooLarge(_)))
            ),
            "{address}"
        );
        assert!(matches!(
            connection.write_tag(address, PlcValue::Int(1)).await,
            Err(Error::Tag(TagError::TooLarge(_)))
        ));
    }

    assert!(plc.requests().is_empty());
    Ok(())
}

#[tokio::test]
async fn several_tags_are_read_in_one_sum_read() -> eyre::Result<()> {
    let (plc, connection) = connect(config()).await?;
    plc.set_memory(0x4040, 0, &42i16.to_le_bytes());
    plc.set_memory(0x4020, 0, &[1]);
    let values: Vec<u8> = (0..10i16).flat_map(|v| (v * 10).to_le_bytes()).collect();
    plc.set_memory(0x4040, 300, &values);
    plc.fail_group(0x5000, ReturnCode::DEVICE_INVALID_GROUP);

    let request = ReadRequest::new()
        .add_address("counter", "MAIN.counter")?
        .add_address("flag", "0x4020/0:BOOL")?
        .add_address("values", "MAIN.values")?
        .add_address("missing", "0x5000/0:INT")?;
    let response = connection.read(request).await?;

    assert_eq!(response.len(), 4);
    assert_eq!(response.value("counter"), Some(&PlcValue::Int(42)));
    assert_eq!(response.value("flag"), Some(&PlcValue::Bool(true)));
    assert_eq!(
        response.value("values"),
        Some(&PlcValue::List((0..10).map(|v| PlcValue::Int(v * 10)).collect()))
    );
    assert_eq!(
        response.code("missing"),
        Some(ResponseCode::Remote(ReturnCode::DEVICE_INVALID_GROUP))
    );
    assert_eq!(response.value("missing"), None);

    assert_eq!(plc.count_requests(is_sum_read), 1);
    assert_eq!(plc.count_requests(is_plain_read), 0);
    Ok(())
}

#[tokio::test]
async fn single_tag_uses_plain_read() -> eyre::Result<()> {
    let (plc, connection) = connect(config()).await?;
    plc.set_memory(0x4020, 4, &99i32.to_le_bytes());

    let response = connection
        .read_single(ReadRequest::new().add_address("value", "0x4020/4:DINT")?)
        .await?;
    assert_eq!(response.value("value"), Some(&PlcValue::DInt(99)));
    assert_eq!(plc.count_requests(is_plain_read), 1);
    assert_eq!(plc.count_requests(is_sum_read), 0);
    Ok(())
}

#[tokio::test]
async fn malformed_calls_are_usage_errors_without_traffic() -> eyre::Result<()> {
    let (plc, connection) = connect(config()).await?;

    let two = ReadRequest::new()
        .add_address("a", "0x4020/0:INT")?
        .add_address("b", "0x4020/2:INT")?;
    assert!(matches!(connection.read_single(two).await, Err(Error::Usage(_))));
    assert!(matches!(
        connection.read(ReadRequest::new()).await,
        Err(Error::Usage(_))
    ));

    let two = WriteRequest::new()
        .add_address("a", "0x4020/0:INT", PlcValue::Int(1))?
        .add_address("b", "0x4020/2:INT", PlcValue::Int(2))?;
    assert!(matches!(connection.write(two).await, Err(Error::Usage(_))));
    assert!(matches!(
        connection.write(WriteRequest::new()).await,
        Err(Error::Usage(_))
    ));

    assert!(matches!(
        connection.read_tag("1/2:NOPE").await,
        Err(Error::Tag(TagError::UnknownDataType { .. }))
    ));

    assert!(plc.requests().is_empty());
    Ok(())
}

#[tokio::test]
async fn unknown_symbol_fails_before_any_request() -> eyre::Result<()> {
    let (plc, connection) = connect(config()).await?;

    let err = connection.read_tag("MAIN.nope").await.unwrap_err();
    assert!(
        matches!(err, Error::Resolve(ResolveError::UnknownSymbol(ref name)) if name == "MAIN.nope"),
        "{err:?}"
    );
    assert!(plc.requests().is_empty());
    assert_eq!(connection.cached_tags(), 0);
    Ok(())
}

#[tokio::test]
async fn device_errors_surface_as_protocol_errors() -> eyre::Result<()> {
    let (plc, connection) = connect(config()).await?;
    plc.fail_group(0x4040, ReturnCode::DEVICE_INVALID_ACCESS);

    let err = connection
        .write_tag("0x4040/0:INT", PlcValue::Int(1))
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::Protocol(ReturnCode::DEVICE_INVALID_ACCESS)),
        "{err:?}"
    );

    let err = connection.read_tag("0x4040/0:INT").await.unwrap_err();
    assert!(
        matches!(err, Error::Protocol(ReturnCode::DEVICE_INVALID_ACCESS)),
        "{err:?}"
    );
    Ok(())
}

#[tokio::test]
async fn array_slice_is_addressed_by_offset() -> eyre::Result<()> {
    let (plc, connection) = connect(config()).await?;
    let values: Vec<u8> = (0..10i16).flat_map(|v| v.to_le_bytes()).collect();
    plc.set_memory(0x4040, 300, &values);

    let value = connection.read_tag("MAIN.values[2..5]").await?;
    assert_eq!(
        value,
        PlcValue::List(vec![PlcValue::Int(2), PlcValue::Int(3), PlcValue::Int(4)])
    );

    let requests = plc.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].payload,
        AdsPayload::ReadRequest {
            index_group: 0x4040,
            index_offset: 304,
            length: 6,
        }
    );

    let err = connection.read_tag("MAIN.values[8..12]").await.unwrap_err();
    assert!(
        matches!(err, Error::Resolve(ResolveError::IndexOutOfRange { .. })),
        "{err:?}"
    );
    Ok(())
}

#[tokio::test]
async fn offset_resolution_skips_handles() -> eyre::Result<()> {
    let (plc, connection) =
        connect(config().with_symbol_resolution(SymbolResolution::Offset)).await?;
    plc.set_memory(0x4040, 112, &(-3i32).to_le_bytes());

    assert_eq!(connection.read_tag("MAIN.motor.pos.y").await?, PlcValue::DInt(-3));
    let requests = plc.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].payload,
        AdsPayload::ReadRequest {
            index_group: 0x4040,
            index_offset: 112,
            length: 4,
        }
    );
    Ok(())
}

#[tokio::test]
async fn structured_symbol_decodes_fields() -> eyre::Result<()> {
    let (plc, connection) = connect(config()).await?;
    plc.set_memory(0x4040, 100, &[1]);
    plc.set_memory(0x4040, 104, &2.5f32.to_le_bytes());
    plc.set_memory(0x4040, 108, &(-3i32).to_le_bytes());
    plc.set_memory(0x4040, 112, &7i32.to_le_bytes());

    let motor = connection.read_tag("MAIN.motor").await?;
    assert_eq!(motor.field("running"), Some(&PlcValue::Bool(true)));
    assert_eq!(motor.field("speed"), Some(&PlcValue::Real(2.5)));
    let pos = motor.field("pos").unwrap();
    assert_eq!(pos.field("x"), Some(&PlcValue::DInt(-3)));
    assert_eq!(pos.field("y"), Some(&PlcValue::DInt(7)));
    Ok(())
}

#[tokio::test]
async fn string_symbol_round_trip() -> eyre::Result<()> {
    let (_plc, connection) = connect(config()).await?;

    connection
        .write_tag("MAIN.name", PlcValue::String("conveyor".to_string()))
        .await?;
    assert_eq!(
        connection.read_tag("MAIN.name").await?,
        PlcValue::String("conveyor".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn browse_is_answered_locally() -> eyre::Result<()> {
    let (plc, connection) = connect(config()).await?;

    let items = connection.browse("MAIN");
    let addresses: Vec<_> = items.iter().map(|i| i.address.as_str()).collect();
    assert_eq!(
        addresses,
        ["MAIN.counter", "MAIN.motor", "MAIN.name", "MAIN.values"]
    );
    let motor = &items[1];
    assert_eq!(motor.children.len(), 3);

    assert!(connection.browse("MAIN.motor.nothing").is_empty());
    assert!(plc.requests().is_empty());
    Ok(())
}

#[tokio::test]
async fn subscription_receives_pushed_samples() -> eyre::Result<()> {
    let (plc, connection) = connect(config()).await?;

    let mut subscription = connection
        .subscribe(
            "MAIN.counter",
            SubscriptionOptions::on_change(Duration::from_millis(100)),
        )
        .await?;
    assert_eq!(subscription.handle(), FIRST_NOTIFICATION_HANDLE);

    let registered = plc.notifications();
    let request = &registered[&FIRST_NOTIFICATION_HANDLE];
    assert_eq!(request.index_group, ADSIGRP_SYM_VALBYHND);
    assert_eq!(request.length, 2);
    assert_eq!(request.mode, TransmissionMode::OnChange);
    assert_eq!(request.cycle_time, 1_000_000);

    plc.notify(
        FIRST_NOTIFICATION_HANDLE,
        FILETIME_ONE_SECOND_AFTER_EPOCH,
        &7i16.to_le_bytes(),
    )
    .await;
    let sample = tokio::time::timeout(Duration::from_secs(5), subscription.next())
        .await
        .context("waiting for notification")?
        .expect("subscription ended");
    assert_eq!(sample.value, Ok(PlcValue::Int(7)));
    assert_eq!(sample.timestamp, UNIX_EPOCH + Duration::from_secs(1));

    // samples for other handles are not delivered here
    plc.notify(FIRST_NOTIFICATION_HANDLE + 50, FILETIME_ONE_SECOND_AFTER_EPOCH, &[1, 0])
        .await;
    assert_eq!(connection.read_tag("0x4020/0:BOOL").await?, PlcValue::Bool(false));
    assert!(subscription.try_next().is_none());

    connection.unsubscribe(subscription).await?;
    assert!(plc.notifications().is_empty());
    Ok(())
}

#[tokio::test]
async fn device_info_and_state() -> eyre::Result<()> {
    let (_plc, connection) = connect(config()).await?;

    let info = connection.read_device_info().await?;
    assert_eq!(info.name, "Plc30 App");
    assert_eq!((info.major, info.minor, info.build), (3, 1, 4024));

    let state = connection.read_state().await?;
    assert_eq!(state.ads_state, 5);
    Ok(())
}

#[tokio::test]
async fn refresh_symbols_releases_cached_handles() -> eyre::Result<()> {
    let (plc, connection) = connect(config()).await?;

    connection.read_tag("MAIN.counter").await?;
    assert_eq!(plc.open_handles(), 1);

    connection.refresh_symbols().await?;
    assert_eq!(plc.released_handles(), vec![FIRST_SYMBOL_HANDLE]);
    assert_eq!(connection.cached_tags(), 0);

    plc.clear_requests();
    connection.read_tag("MAIN.counter").await?;
    assert_eq!(plc.count_requests(is_handle_request), 1);
    Ok(())
}

#[tokio::test]
async fn refresh_during_resolution_releases_the_stale_handle() -> eyre::Result<()> {
    let (plc, connection) = connect(config()).await?;
    plc.set_memory(0x4040, 0, &5i16.to_le_bytes());
    plc.ignore_requests(is_handle_request);
    let stale_handle = 0x0BADu32;

    let refresh = async {
        while plc.count_requests(is_handle_request) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        connection.refresh_symbols().await?;

        // answer the handle request that was in flight during the refresh
        let request = plc
            .requests()
            .into_iter()
            .find(is_handle_request)
            .ok_or_else(|| eyre::eyre!("no handle request"))?;
        plc.answer_all_requests();
        let response = AmsPacket::response_to(
            &request,
            AdsPayload::ReadWriteResponse {
                result: ReturnCode::OK,
                data: Bytes::copy_from_slice(&stale_handle.to_le_bytes()),
            },
        );
        plc.inject_raw(&frame_packet(&response)).await;
        eyre::Ok(())
    };
    let (value, refreshed) = tokio::join!(connection.read_tag("MAIN.counter"), refresh);
    refreshed?;

    assert_eq!(value?, PlcValue::Int(5));
    let released_stale = |packet: &AmsPacket| {
        matches!(
            &packet.payload,
            AdsPayload::WriteRequest {
                index_group: ADSIGRP_SYM_RELEASEHND,
                data,
                ..
            } if data[..] == stale_handle.to_le_bytes()
        )
    };
    assert_eq!(plc.count_requests(released_stale), 1);
    assert_eq!(plc.open_handles(), 1);
    assert_eq!(connection.cached_tags(), 1);

    connection.close().await;
    assert_eq!(plc.released_handles(), vec![FIRST_SYMBOL_HANDLE]);
    Ok(())
}

#[tokio::test]
async fn close_releases_device_resources() -> eyre::Result<()> {
    let (plc, connection) = connect(config()).await?;

    connection.read_tag("MAIN.counter").await?;
    let mut subscription = connection
        .subscribe("0x4020/0:INT", SubscriptionOptions::default())
        .await?;

    connection.close().await;

    assert!(connection.is_closed());
    assert_eq!(plc.released_handles(), vec![FIRST_SYMBOL_HANDLE]);
    assert!(plc.notifications().is_empty());
    assert!(subscription.next().await.is_none());
    assert!(matches!(
        connection.read_tag("0x4020/0:INT").await,
        Err(Error::ConnectionClosed)
    ));
    Ok(())
}

#[tokio::test]
async fn close_fails_outstanding_requests() -> eyre::Result<()> {
    let (plc, connection) = connect(config()).await?;
    plc.ignore_requests(|packet| {
        matches!(
            packet.payload,
            AdsPayload::ReadRequest {
                index_group: 0x4020,
                ..
            }
        )
    });
    let connection = Arc::new(connection);

    let waiting = tokio::spawn({
        let connection = connection.clone();
        async move { connection.read_tag("0x4020/0:INT").await }
    });
    tokio::time::timeout(Duration::from_secs(5), async {
        while connection.pending_requests() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .context("waiting for request to be pending")?;

    connection.close().await;
    let result = waiting.await?;
    assert!(matches!(result, Err(Error::ConnectionClosed)), "{result:?}");
    Ok(())
}

#[tokio::test]
async fn device_going_away_closes_connection() -> eyre::Result<()> {
    let (plc, connection) = connect(config()).await?;

    plc.disconnect().await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while !connection.is_closed() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .context("waiting for connection to notice the disconnect")?;

    assert!(matches!(
        connection.read_tag("0x4020/0:INT").await,
        Err(Error::ConnectionClosed)
    ));
    Ok(())
}
