//! Dispatcher behaviour over the simulated bus: correlation, per-class
//! exclusivity, async contexts, event routing and flushing.

use embassy_time::{Duration, Timer};
use futures_lite::future::{block_on, yield_now, zip};
use nwp_host::bus::frame::QUEUE_BT;
use nwp_host::bus::{FrameFlags, FrameHeader};
use nwp_host::dispatch::command;
use nwp_host::error::{Error, FW_STATUS_REJOIN_FAILURE, FirmwareStatus};
use nwp_host::sim::{ScriptedReply, SimulatedNwp};
use nwp_host::{CommandClass, Dispatcher, DriverConfig, Reply, WaitPolicy};

use crate::harness::drive;

fn setup() -> (Dispatcher, SimulatedNwp) {
    (Dispatcher::new(&DriverConfig::default()), SimulatedNwp::new())
}

const SHORT: Duration = Duration::from_millis(100);

#[test]
fn response_payload_is_correlated() {
    let (d, sim) = setup();
    sim.script(command::RSSI, ScriptedReply::payload(vec![61, 0]));
    let reply = drive(
        &d,
        &sim,
        d.send_command(CommandClass::Wlan, command::RSSI, &[], WaitPolicy::Response(SHORT), None),
    )
    .unwrap();
    let response = reply.into_response().unwrap();
    assert_eq!(response.command(), command::RSSI);
    assert_eq!(response.payload(), &[61, 0]);
    assert_eq!(d.pool().available(), d.pool().capacity() - 1);
    drop(response);
    assert_eq!(d.pool().available(), d.pool().capacity());
}

#[test]
fn firmware_status_maps_into_error() {
    let (d, sim) = setup();
    sim.script(command::BAND, ScriptedReply::status(0x30));
    let r = drive(
        &d,
        &sim,
        d.send_command(CommandClass::Wlan, command::BAND, &[0], WaitPolicy::Status(SHORT), None),
    );
    let err = r.unwrap_err();
    assert_eq!(err, Error::Firmware(FirmwareStatus::new(0x30).unwrap()));
    assert_eq!(err.status(), 0x1_0030);
}

#[test]
fn second_request_on_busy_class_is_refused() {
    let (d, sim) = setup();
    sim.script(command::JOIN, ScriptedReply::dropped());
    let first = d.send_command(
        CommandClass::Wlan,
        command::JOIN,
        &[],
        WaitPolicy::Status(Duration::from_millis(80)),
        None,
    );
    let second = async {
        Timer::after(Duration::from_millis(10)).await;
        d.send_command(CommandClass::Wlan, command::INIT, &[], WaitPolicy::Status(SHORT), None)
            .await
    };
    let (a, b) = drive(&d, &sim, zip(first, second));
    assert_eq!(a.unwrap_err(), Error::Timeout);
    assert_eq!(b.unwrap_err(), Error::Busy);

    // The timed-out request released the channel.
    let again = drive(
        &d,
        &sim,
        d.send_command(CommandClass::Wlan, command::INIT, &[], WaitPolicy::Status(SHORT), None),
    );
    assert!(matches!(again, Ok(Reply::Completed)));
}

#[test]
fn classes_run_side_by_side() {
    let (d, sim) = setup();
    let wlan =
        d.send_command(CommandClass::Wlan, command::INIT, &[], WaitPolicy::Status(SHORT), None);
    let net = d.send_command(
        CommandClass::Network,
        command::IPCONFV4,
        &[0; 4],
        WaitPolicy::Status(SHORT),
        None,
    );
    let (a, b) = drive(&d, &sim, zip(wlan, net));
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(sim.sent().len(), 2);
}

#[test]
fn async_answer_carries_context() {
    let (d, sim) = setup();
    let reply = drive(
        &d,
        &sim,
        d.send_command(CommandClass::Wlan, command::SCAN, &[0; 50], WaitPolicy::Async, Some(42)),
    )
    .unwrap();
    assert!(matches!(reply, Reply::InProgress));

    let event = drive(&d, &sim, d.next_event(CommandClass::Wlan, SHORT)).unwrap();
    assert_eq!(event.command(), command::SCAN);
    assert_eq!(event.context(), Some(42));
}

#[test]
fn unsolicited_frames_route_by_queue() {
    let (d, sim) = setup();
    sim.inject_event(QUEUE_BT, 0x0F10, &[1, 2, 3]);
    let event = drive(&d, &sim, d.next_event(CommandClass::Bt, SHORT)).unwrap();
    assert_eq!(event.command(), 0x0F10);
    assert_eq!(event.payload(), &[1, 2, 3]);
    assert_eq!(event.context(), None);

    let none = drive(&d, &sim, d.next_event(CommandClass::Wlan, Duration::from_millis(20)));
    assert_eq!(none.unwrap_err(), Error::Timeout);
}

#[test]
fn flush_releases_queued_waiter_with_rejoin_failure() {
    // No pump: the request stays on the TX queue.
    let (d, _sim) = setup();
    let waiter = d.send_command(
        CommandClass::Wlan,
        command::JOIN,
        &[],
        WaitPolicy::Status(Duration::from_secs(5)),
        None,
    );
    let flusher = async {
        yield_now().await;
        d.flush(CommandClass::Wlan)
    };
    let (r, woken) = block_on(zip(waiter, flusher));
    assert_eq!(woken, 1);
    assert_eq!(
        r.unwrap_err(),
        Error::Firmware(FirmwareStatus::new(FW_STATUS_REJOIN_FAILURE).unwrap())
    );
    assert!(!d.channel(CommandClass::Wlan).is_busy());
}

#[test]
fn opermode_holds_the_bus_until_answered() {
    let (d, _sim) = setup();
    let opermode = d.send_command(
        CommandClass::Common,
        command::OPERMODE,
        &[0; 16],
        WaitPolicy::Status(SHORT),
        None,
    );
    let probe = async {
        yield_now().await;
        let first = d.next_transmit();
        let blocked = d.global_block();
        (first.is_some(), blocked, d.next_transmit().is_none())
    };
    let (r, (sent, blocked, held)) = block_on(zip(opermode, probe));
    assert!(sent);
    assert_eq!(blocked.map(|(c, _)| c), Some(CommandClass::Common));
    assert!(held);
    // Never answered: the waiter times out and the block is lifted.
    assert_eq!(r.unwrap_err(), Error::Timeout);
    assert_eq!(d.global_block(), None);
}

#[test]
fn queued_class_waits_as_long_as_the_caller_asked() {
    let mut config = DriverConfig::default();
    config.timeouts.bt_ms = 50;
    let d = Dispatcher::new(&config);
    let sim = SimulatedNwp::new();
    sim.script(0x00A0, ScriptedReply::dropped());

    let request = d.send_command(
        CommandClass::Bt,
        0x00A0,
        &[],
        WaitPolicy::Status(Duration::from_millis(500)),
        None,
    );
    // Answer well past the class default but inside the caller's wait.
    let slow_answer = async {
        Timer::after(Duration::from_millis(150)).await;
        let answer = FrameHeader {
            payload_len: 0,
            queue_id: QUEUE_BT,
            command: 0x00A0,
            packet_id: 0,
            flags: FrameFlags::STATUS_EXPECTED,
            status: 0,
        };
        sim.inject_bytes(&answer.encode());
    };
    let (r, ()) = drive(&d, &sim, zip(request, slow_answer));
    assert!(matches!(r, Ok(Reply::Completed)));
    assert_eq!(d.channel(CommandClass::Bt).in_flight(), None);
}

#[test]
fn refused_write_fails_the_request_and_frees_the_bus() {
    let (d, sim) = setup();
    sim.set_write_fault(true);
    let started = embassy_time::Instant::now();
    let r = drive(
        &d,
        &sim,
        d.send_command(
            CommandClass::Common,
            command::OPERMODE,
            &[0; 16],
            WaitPolicy::Status(Duration::from_secs(5)),
            None,
        ),
    );
    assert_eq!(r.unwrap_err(), Error::TransmitFailed);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(d.global_block(), None);

    // The bus recovers and other classes are not held back.
    sim.set_write_fault(false);
    let again = drive(
        &d,
        &sim,
        d.send_command(CommandClass::Wlan, command::INIT, &[], WaitPolicy::Status(SHORT), None),
    );
    assert!(matches!(again, Ok(Reply::Completed)));
    assert_eq!(d.pool().available(), d.pool().capacity());
}
