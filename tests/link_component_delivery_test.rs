//! A `Link` configured for local delivery handing its payload to a real
//! component built out of `SendEvent`/`OnEvent`/`Timer`: first
//! synchronously through `Inline`, then across `Session`'s own channel
//! through `SessionSender`, exercising both ways the sync core's "whatever
//! sits on the far side of a Link" collaborator can be driven.

use std::time::Duration;

use vortex_sync::component::{Inline, OnEvent, SendEvent, Session, Timer, Void};
use vortex_sync::event::DeliveryInfo;
use vortex_sync::link::{Destination, Link, LinkId};
use vortex_sync::time::TimeLord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Deposit(u32);

#[derive(Debug, Default)]
struct Ledger(u32);

impl OnEvent<Deposit> for Ledger {
    fn on_event(&mut self, event: Deposit, _timer: &mut dyn Timer<Deposit>) -> anyhow::Result<()> {
        self.0 += event.0;
        Ok(())
    }
}

fn local_link(handler: u32) -> Link {
    let mut link = Link::new(LinkId(1), TimeLord::get_time_converter(1));
    link.set_latency(0);
    link.finalize_configuration(Destination::Local(handler)).unwrap();
    link
}

#[test]
fn locally_delivered_event_reaches_a_component_through_inline_delivery() {
    let link = local_link(0);
    let envelope = link.send(0, 0, 7u32.to_le_bytes().to_vec()).unwrap();
    assert_eq!(envelope.delivery_info, DeliveryInfo::Local(0));

    let payload = u32::from_le_bytes(envelope.payload.try_into().unwrap());

    let mut ledger = Ledger::default();
    let mut session = Session::<Deposit>::new();
    Inline(&mut ledger, &mut session).send(Deposit(payload)).unwrap();

    assert_eq!(ledger.0, 7);
}

#[tokio::test]
async fn locally_delivered_event_reaches_a_component_through_its_session_loop() {
    let link = local_link(0);
    let envelope = link.send(0, 0, 11u32.to_le_bytes().to_vec()).unwrap();
    let payload = u32::from_le_bytes(envelope.payload.try_into().unwrap());

    let mut session = Session::<Deposit>::new();
    let mut sender = session.sender();
    sender.send(Deposit(payload)).unwrap();

    let mut ledger = Ledger::default();
    let _ = tokio::time::timeout(Duration::from_millis(50), session.run(&mut ledger)).await;
    assert_eq!(ledger.0, 11);
}

#[test]
fn void_silently_discards_whatever_a_component_forwards_to_it() {
    let mut sink = Void;
    SendEvent::send(&mut sink, Deposit(99)).unwrap();
}
