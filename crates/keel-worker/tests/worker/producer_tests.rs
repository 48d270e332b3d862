//! Producer routing against a catalog that changes underneath it.

use crate::test_utilities::*;
use keel::{PartitionCatalog, SelectMode, partition_for_key};
use keel_worker::{PartitionQueues, QueueProducer, WorkerConfig};
use std::sync::Arc;
use std::time::Duration;
use test_log::test;

#[test(tokio::test)]
async fn test_send_waits_for_capacity() {
    let (service, catalog) = create_test_service(1);
    let config = WorkerConfig {
        queue_capacity: 1,
        ..create_test_worker_config()
    };
    let queues = Arc::new(PartitionQueues::from_config(&config));
    let producer = Arc::new(QueueProducer::new(&catalog, TEST_TOPIC, Arc::clone(&queues)).unwrap());

    producer.send(1, SelectMode::Direct(0)).await.unwrap();
    let blocked = tokio::spawn({
        let producer = Arc::clone(&producer);
        async move { producer.send(2, SelectMode::Direct(0)).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!blocked.is_finished());

    let partition = catalog.partitions_of(TEST_TOPIC).unwrap().remove(0);
    let drained = queues.queue(&partition).pop_batch(1);
    assert_eq!(drained[0].item, 1);

    let routed = tokio::time::timeout(Duration::from_secs(1), blocked)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(routed, partition);
    assert_eq!(queues.total_len(), 1);
    service.shutdown().await;
}

#[test(tokio::test)]
async fn test_key_routing_follows_growth_after_refresh() {
    let (service, catalog) = create_test_service(2);
    let (queues, _dead_letters) = create_test_queues();
    let producer = QueueProducer::new(&catalog, TEST_TOPIC, Arc::clone(&queues)).unwrap();

    let before = producer.try_send(1, SelectMode::Key(b"tenant-9")).unwrap();
    assert_eq!(before.partition_id.0 as usize, partition_for_key(b"tenant-9", 2).unwrap());

    catalog.add_partitions(TEST_TOPIC, 3).unwrap();
    assert_eq!(service.notify_partitions_changed(TEST_TOPIC).await, 1);
    assert_eq!(producer.refresh(&catalog).unwrap(), 5);

    let after = producer.try_send(2, SelectMode::Key(b"tenant-9")).unwrap();
    assert_eq!(after.partition_id.0 as usize, partition_for_key(b"tenant-9", 5).unwrap());
    service.shutdown().await;
}
