//! # End-to-End Scenarios
//!
//! A four-replica cluster (`f = 1`) serving `add(a, b)` to one client:
//!
//! 1. **Happy path**: `add(5, 7)` commits in view 0 and settles to 12
//! 2. **Duplicate request**: a retransmit is answered from the reply cache
//! 3. **Checkpoint GC**: the 100th request makes a checkpoint stable,
//!    collects the cache and slides the window
//! 4. **Window exhaustion**: requests beyond the high watermark wait in the
//!    buffer until checkpoints slide the window
//! 5. **View change**: a crashed primary is replaced by replica 1 in view 1

#[cfg(test)]
mod tests {
    use crate::harness::{Cluster, Delivery};
    use pbft_replica::ReplicaConfig;
    use std::time::Duration;

    // =========================================================================
    // NORMAL CASE
    // =========================================================================

    #[test]
    fn test_happy_path_add() {
        let cluster = Cluster::new().unwrap();
        let ticket = cluster.submit(5, 7).unwrap();
        cluster.deliver_all().unwrap();

        assert_eq!(ticket.result(), Some(12));
        assert_eq!(cluster.client.pending(), 0);
        assert_eq!(cluster.cached_results(ticket.request()), vec![12; 4]);
        for replica in &cluster.replicas {
            assert_eq!(replica.view(), 0);
            assert!(!replica.is_disgruntled());
        }
        assert_eq!(cluster.replica(0).last_seq(), 1);
    }

    #[test]
    fn test_duplicate_request_answered_from_cache() {
        let cluster = Cluster::new().unwrap();
        let ticket = cluster.submit(5, 7).unwrap();
        cluster.deliver_all().unwrap();
        assert_eq!(ticket.result(), Some(12));

        cluster.rebroadcast(ticket.request()).unwrap();
        // Four requests in, four cached replies out, nothing ordered
        assert_eq!(cluster.deliver_all().unwrap(), 8);
        assert_eq!(cluster.replica(0).last_seq(), 1);
    }

    #[test]
    fn test_sequential_requests_get_consecutive_seqs() {
        let cluster = Cluster::new().unwrap();
        for i in 0..5 {
            let ticket = cluster.submit(i, i).unwrap();
            cluster.deliver_all().unwrap();
            assert_eq!(ticket.result(), Some(2 * i));
        }
        assert_eq!(cluster.replica(0).last_seq(), 5);
    }

    // =========================================================================
    // CHECKPOINTS AND WATERMARKS
    // =========================================================================

    #[test]
    fn test_checkpoint_collects_log_at_100() {
        let cluster = Cluster::new().unwrap();
        let mut tickets = Vec::new();
        for i in 0..100 {
            tickets.push(cluster.submit(i, 1).unwrap());
            cluster.deliver_all().unwrap();
        }
        assert!(tickets.iter().all(|t| t.is_done()));

        for replica in &cluster.replicas {
            let log = replica.log();
            assert_eq!(log.low_water_mark(), 100);
            assert_eq!(log.high_water_mark(), 300);
            assert_eq!(log.cached_tickets(), 0);
            assert!(log.stable_checkpoint().proofs.len() >= 3);
        }

        let next = cluster.submit(5, 7).unwrap();
        cluster.deliver_all().unwrap();
        assert_eq!(next.result(), Some(12));
        assert_eq!(cluster.replica(0).last_seq(), 101);
    }

    #[test]
    fn test_requests_beyond_window_wait_for_checkpoint() {
        let config = ReplicaConfig {
            checkpoint_interval: 2,
            watermark_interval: 4,
            ..ReplicaConfig::default()
        };
        let cluster = Cluster::with_config(config, Delivery::Fifo, 0).unwrap();

        let tickets: Vec<_> = (0..10).map(|i| cluster.submit(i, 10).unwrap()).collect();
        cluster.deliver_all().unwrap();

        for (i, ticket) in tickets.iter().enumerate() {
            assert_eq!(ticket.result(), Some(i as i64 + 10));
        }
        assert_eq!(cluster.replica(0).last_seq(), 10);
        assert_eq!(cluster.replica(0).log().buffered(), 0);
        assert_eq!(cluster.replica(0).log().low_water_mark(), 10);
    }

    // =========================================================================
    // VIEW CHANGE
    // =========================================================================

    #[test]
    fn test_crashed_primary_replaced_in_view_one() {
        let cluster = Cluster::new().unwrap();
        cluster.crash(0);

        let ticket = cluster.submit(5, 7).unwrap();
        cluster.run_until(10, |_| ticket.is_done()).unwrap();

        assert_eq!(ticket.result(), Some(12));
        for replica in cluster.live_replicas() {
            assert_eq!(replica.view(), 1);
            assert_eq!(replica.primary(), 1);
            assert!(!replica.is_disgruntled());
        }
        assert_eq!(cluster.client.primary(), 1);
    }

    #[test]
    fn test_new_view_keeps_serving() {
        let cluster = Cluster::new().unwrap();
        cluster.crash(0);
        let first = cluster.submit(1, 1).unwrap();
        cluster.run_until(10, |_| first.is_done()).unwrap();

        // The client now talks to replica 1 directly
        let second = cluster.submit(2, 2).unwrap();
        cluster.deliver_all().unwrap();
        assert_eq!(second.result(), Some(4));
    }

    #[test]
    fn test_idle_cluster_never_changes_view() {
        let cluster = Cluster::new().unwrap();
        for _ in 0..5 {
            cluster.advance(Duration::from_secs(10)).unwrap();
            cluster.deliver_all().unwrap();
        }
        assert!(cluster.replicas.iter().all(|r| r.view() == 0));
    }

    // =========================================================================
    // CONCURRENCY AND REORDERING
    // =========================================================================

    #[test]
    fn test_shuffled_delivery_agrees() {
        for seed in 0..5 {
            let cluster = Cluster::shuffled(seed).unwrap();
            let tickets: Vec<_> = (0..20).map(|i| cluster.submit(i, i).unwrap()).collect();
            cluster.deliver_all().unwrap();

            for (i, ticket) in tickets.iter().enumerate() {
                assert_eq!(ticket.result(), Some(2 * i as i64), "seed {seed}");
                // No two replicas executed the request differently
                let results = cluster.cached_results(ticket.request());
                assert!(results.iter().all(|r| *r == 2 * i as i64), "seed {seed}");
            }
        }
    }

    #[test]
    fn test_parallel_delivery_settles_everything() {
        let cluster = Cluster::new().unwrap();
        let tickets: Vec<_> = (0..25).map(|i| cluster.submit(i, 100).unwrap()).collect();
        cluster.deliver_parallel(4).unwrap();

        for (i, ticket) in tickets.iter().enumerate() {
            assert_eq!(ticket.result(), Some(i as i64 + 100));
        }
        assert_eq!(cluster.replica(0).last_seq(), 25);
        assert_eq!(cluster.client.pending(), 0);
    }
}
