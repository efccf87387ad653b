//! Integration tests for the spatial index facade.
//!
//! These cross-check the tree-backed query engines against brute-force
//! linear scans on randomized point sets, and verify that bulk loading,
//! incremental insertion, deletion histories and persistence all agree.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

use paged_rstar::{
    EuclideanDistance, FilePageStore, MemoryPageStore, MemoryRelation, SpatialIndex, TreeConfig,
};

fn random_points(rng: &mut StdRng, n: usize, dims: usize) -> Vec<(u64, Vec<f64>)> {
    (0..n)
        .map(|i| {
            let point: Vec<f64> = (0..dims).map(|_| rng.gen_range(-100.0..100.0)).collect();
            (i as u64, point)
        })
        .collect()
}

fn build_index(
    points: &[(u64, Vec<f64>)],
    dims: usize,
    max_entries: usize,
) -> SpatialIndex<MemoryRelation, MemoryPageStore> {
    let relation = Arc::new(MemoryRelation::new(dims));
    for (id, point) in points {
        relation.put(*id, point.clone()).unwrap();
    }
    let index = SpatialIndex::new(
        relation,
        MemoryPageStore::new(),
        TreeConfig::new(max_entries),
    )
    .unwrap();
    for (id, _) in points {
        index.insert(*id).unwrap();
    }
    index
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

fn brute_force_range(points: &[(u64, Vec<f64>)], center: &[f64], radius: f64) -> Vec<u64> {
    let mut ids: Vec<u64> = points
        .iter()
        .filter(|(_, p)| euclidean(p, center) <= radius)
        .map(|(id, _)| *id)
        .collect();
    ids.sort_unstable();
    ids
}

fn brute_force_knn(points: &[(u64, Vec<f64>)], center: &[f64], k: usize) -> Vec<u64> {
    let mut scored: Vec<(f64, u64)> = points
        .iter()
        .map(|(id, p)| (euclidean(p, center), *id))
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    scored.truncate(k);
    scored.into_iter().map(|(_, id)| id).collect()
}

#[test]
fn test_range_query_matches_brute_force() {
    let mut rng = StdRng::seed_from_u64(42);
    let points = random_points(&mut rng, 300, 2);
    let index = build_index(&points, 2, 8);
    let distance = EuclideanDistance;

    for _ in 0..25 {
        let center = [rng.gen_range(-100.0..100.0), rng.gen_range(-100.0..100.0)];
        let radius = rng.gen_range(1.0..80.0);

        let mut got: Vec<u64> = index
            .range_query(&distance, &center, radius)
            .expect("euclidean is spatial")
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        got.sort_unstable();

        assert_eq!(got, brute_force_range(&points, &center, radius));
    }
}

#[test]
fn test_knn_query_matches_brute_force_across_dims() {
    for dims in [2usize, 3, 5] {
        let mut rng = StdRng::seed_from_u64(7 + dims as u64);
        let points = random_points(&mut rng, 200, dims);
        let index = build_index(&points, dims, 8);
        let distance = EuclideanDistance;

        for k in [1usize, 5, 17] {
            let center: Vec<f64> = (0..dims).map(|_| rng.gen_range(-100.0..100.0)).collect();

            let result = index
                .knn_query(&distance, &center, k)
                .expect("euclidean is spatial")
                .unwrap();
            assert_eq!(result.len(), k.min(points.len()));

            // Ordered by ascending distance
            for pair in result.windows(2) {
                assert!(pair[0].1 <= pair[1].1);
            }

            let mut got: Vec<u64> = result.iter().map(|(id, _)| *id).collect();
            got.sort_unstable();
            let mut want = brute_force_knn(&points, &center, k);
            want.sort_unstable();
            assert_eq!(got, want, "dims={dims} k={k}");
        }
    }
}

#[test]
fn test_bulk_load_equals_incremental() {
    let mut rng = StdRng::seed_from_u64(99);
    let points = random_points(&mut rng, 250, 3);
    let ids: Vec<u64> = points.iter().map(|(id, _)| *id).collect();

    let incremental = build_index(&points, 3, 8);

    let relation = Arc::new(MemoryRelation::new(3));
    for (id, point) in &points {
        relation.put(*id, point.clone()).unwrap();
    }
    let bulk = SpatialIndex::new(relation, MemoryPageStore::new(), TreeConfig::new(8)).unwrap();
    bulk.insert_all(&ids).unwrap();

    assert_eq!(bulk.len(), incremental.len());
    assert!(bulk.check_integrity().unwrap().is_valid());

    let distance = EuclideanDistance;
    for _ in 0..15 {
        let center: Vec<f64> = (0..3).map(|_| rng.gen_range(-100.0..100.0)).collect();
        let radius = rng.gen_range(5.0..90.0);

        let collect = |index: &SpatialIndex<MemoryRelation, MemoryPageStore>| {
            let mut ids: Vec<u64> = index
                .range_query(&distance, &center, radius)
                .unwrap()
                .unwrap()
                .into_iter()
                .map(|(id, _)| id)
                .collect();
            ids.sort_unstable();
            ids
        };

        assert_eq!(collect(&bulk), collect(&incremental));
    }
}

#[test]
fn test_queries_track_deletion_history() {
    let mut rng = StdRng::seed_from_u64(1234);
    let mut points = random_points(&mut rng, 150, 2);
    let index = build_index(&points, 2, 6);
    let distance = EuclideanDistance;

    // Delete a random half, checking queries against the survivors
    for _ in 0..75 {
        let victim = points.remove(rng.gen_range(0..points.len()));
        assert!(index.delete(victim.0).unwrap());

        let center = [rng.gen_range(-100.0..100.0), rng.gen_range(-100.0..100.0)];
        let radius = rng.gen_range(10.0..60.0);
        let mut got: Vec<u64> = index
            .range_query(&distance, &center, radius)
            .unwrap()
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        got.sort_unstable();
        assert_eq!(got, brute_force_range(&points, &center, radius));
    }

    let report = index.check_integrity().unwrap();
    assert!(report.is_valid(), "violations: {:?}", report.violations);
}

#[test]
fn test_insert_then_delete_everything_restores_empty_tree() {
    let mut rng = StdRng::seed_from_u64(5);
    let points = random_points(&mut rng, 120, 2);
    let ids: Vec<u64> = points.iter().map(|(id, _)| *id).collect();

    let index = build_index(&points, 2, 5);
    assert!(index.height() > 1);

    assert_eq!(index.delete_all(&ids).unwrap(), ids.len());
    assert!(index.is_empty());
    assert_eq!(index.height(), 0, "height must return to its initial value");

    // Deleting again finds nothing
    assert_eq!(index.delete_all(&ids).unwrap(), 0);
}

#[test]
fn test_integrity_after_mixed_operations() {
    let mut rng = StdRng::seed_from_u64(77);
    let relation = Arc::new(MemoryRelation::new(2));
    let index = SpatialIndex::new(
        relation.clone(),
        MemoryPageStore::new(),
        TreeConfig::new(6),
    )
    .unwrap();

    let mut live: Vec<u64> = Vec::new();
    for id in 0..400u64 {
        let op: f64 = rng.gen();
        if op < 0.7 || live.is_empty() {
            let point = vec![rng.gen_range(-50.0..50.0), rng.gen_range(-50.0..50.0)];
            relation.put(id, point).unwrap();
            index.insert(id).unwrap();
            live.push(id);
        } else {
            let victim = live.remove(rng.gen_range(0..live.len()));
            assert!(index.delete(victim).unwrap());
        }
    }

    assert_eq!(index.len() as usize, live.len());
    let report = index.check_integrity().unwrap();
    assert!(report.is_valid(), "violations: {:?}", report.violations);
}

#[test]
fn test_file_backed_index_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index.rstar");

    let mut rng = StdRng::seed_from_u64(2024);
    let points = random_points(&mut rng, 80, 2);
    let ids: Vec<u64> = points.iter().map(|(id, _)| *id).collect();

    let relation = Arc::new(MemoryRelation::new(2));
    for (id, point) in &points {
        relation.put(*id, point.clone()).unwrap();
    }

    let distance = EuclideanDistance;
    let center = [0.0, 0.0];
    let expected: Vec<u64>;
    {
        let store = FilePageStore::create(&path, 2).unwrap();
        let index = SpatialIndex::new(relation.clone(), store, TreeConfig::new(8)).unwrap();
        index.insert_all(&ids).unwrap();

        let mut hits: Vec<u64> = index
            .range_query(&distance, &center, 50.0)
            .unwrap()
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        hits.sort_unstable();
        expected = hits;

        index.close().unwrap();
    }

    let store = FilePageStore::open(&path).unwrap();
    let index = SpatialIndex::open(relation, store, TreeConfig::new(8)).unwrap();
    assert_eq!(index.len() as usize, points.len());

    let mut hits: Vec<u64> = index
        .range_query(&distance, &center, 50.0)
        .unwrap()
        .unwrap()
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    hits.sort_unstable();
    assert_eq!(hits, expected);

    assert!(index.check_integrity().unwrap().is_valid());
}

#[test]
fn test_duplicate_coordinates_deleted_by_identifier() {
    let relation = Arc::new(MemoryRelation::new(2));
    relation.put(1, vec![5.0, 5.0]).unwrap();
    relation.put(2, vec![5.0, 5.0]).unwrap();
    relation.put(3, vec![5.0, 5.0]).unwrap();

    let index = SpatialIndex::new(
        relation,
        MemoryPageStore::new(),
        TreeConfig::new(3).with_min_entries(1),
    )
    .unwrap();
    index.insert_all(&[1, 2, 3]).unwrap();

    assert!(index.delete(2).unwrap());
    assert_eq!(index.len(), 2);

    let got = index
        .knn_query(&EuclideanDistance, &[5.0, 5.0], 3)
        .unwrap()
        .unwrap();
    let ids: Vec<u64> = got.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![1, 3]);
}
