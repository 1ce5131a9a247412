//! One rank, two threads, inter-thread min latency 2: a producer on
//! thread 0 sends one event per cycle to thread 1 for 100 cycles. Both
//! the hand-off through `ThreadSync` and the receiving `TimeVortex` must
//! preserve strict delivery-time ordering, and the full 100 events must
//! arrive.

use vortex_sync::activity::Activity;
use vortex_sync::event::{DeliveryInfo, EventEnvelope};
use vortex_sync::link::{Destination, Link, LinkId, LinkTable};
use vortex_sync::thread_sync::{ThreadBarriers, ThreadInboxes, ThreadSync};
use vortex_sync::time::TimeLord;
use vortex_sync::time_vortex::TimeVortex;

const LATENCY: u64 = 2;
const CYCLES: u64 = 100;

fn link_table() -> LinkTable {
    let mut table = LinkTable::new();
    let mut link = Link::new(LinkId(1), TimeLord::get_time_converter(1));
    link.set_latency(LATENCY);
    link.finalize_configuration(Destination::Thread {
        rank_local_thread: 1,
        handler: 7,
    })
    .unwrap();
    table.register(link);
    table
}

#[test]
fn hundred_cycles_of_one_event_deliver_in_order_and_stop_at_t_100() {
    let _ = tracing_subscriber::fmt::try_init();

    let barriers = ThreadBarriers::new(2);
    let (inboxes, mut receivers) = ThreadInboxes::new(2);
    let mut producer = ThreadSync::new(0, 2, barriers.clone(), LATENCY, inboxes.clone(), receivers.remove(0));
    let mut consumer = ThreadSync::new(1, 2, barriers, LATENCY, inboxes, receivers.remove(0));

    // A producer on thread 0 emits one event per cycle, t = 0..CYCLES,
    // each carrying the link's latency already applied (as `Link::send`
    // would have done before handing it to the queue).
    for t in 0..CYCLES {
        producer.queue_for_thread(1).insert(EventEnvelope::new(
            t + LATENCY,
            DeliveryInfo::Remote(LinkId(1)),
            t.to_le_bytes().to_vec(),
        ));
    }

    let producer_table = link_table();
    let consumer_table = LinkTable::new();

    std::thread::scope(|scope| {
        scope.spawn(|| producer.execute(&producer_table, 0, 0).unwrap());
        scope.spawn(|| consumer.execute(&consumer_table, 0, 0).unwrap());
    });

    let mut consumer_vortex = TimeVortex::new();
    for event in consumer.drain_inbox() {
        assert_eq!(event.delivery_info, DeliveryInfo::Local(7));
        consumer_vortex.insert(Activity::Event(event));
    }
    assert_eq!(consumer_vortex.len(), CYCLES as usize);

    let mut delivered = 0u64;
    let mut last_time = None;
    while let Some(activity) = consumer_vortex.pop().unwrap() {
        if matches!(activity, Activity::StopAction(_)) {
            break;
        }
        let t = activity.delivery_time();
        if let Some(last) = last_time {
            assert!(t >= last, "delivery time regressed: {t} < {last}");
        }
        last_time = Some(t);
        delivered += 1;
    }
    assert_eq!(delivered, CYCLES);
    assert_eq!(last_time, Some(CYCLES - 1 + LATENCY));
}
