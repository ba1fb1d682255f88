//! Subgrouping policies: partition a bin's walkers so that merges never cross
//! unrelated trajectory families.

use ahash::AHashMap;

use super::types::{Parent, Segment};

pub trait SubgroupPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Move every walker into exactly one non-empty subgroup. Subgroup order
    /// follows first appearance in `segments`.
    fn partition(&self, segments: Vec<Segment>) -> Vec<Vec<Segment>>;
}

/// Everything in one subgroup.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrivialSubgroups;

impl SubgroupPolicy for TrivialSubgroups {
    fn name(&self) -> &'static str {
        "trivial"
    }

    fn partition(&self, segments: Vec<Segment>) -> Vec<Vec<Segment>> {
        if segments.is_empty() {
            Vec::new()
        } else {
            vec![segments]
        }
    }
}

/// Walkers descended from the same walker of the previous iteration form one
/// family (see [`Segment::lineage_key`]).
#[derive(Debug, Clone, Copy, Default)]
pub struct LineageSubgroups;

impl SubgroupPolicy for LineageSubgroups {
    fn name(&self) -> &'static str {
        "lineage"
    }

    fn partition(&self, segments: Vec<Segment>) -> Vec<Vec<Segment>> {
        let mut index: AHashMap<Option<Parent>, usize> = AHashMap::default();
        let mut groups: Vec<Vec<Segment>> = Vec::new();
        for seg in segments {
            let pos = *index.entry(seg.lineage_key()).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[pos].push(seg);
        }
        groups
    }
}

/// Single-linkage clusters of trajectory endpoints: two walkers share a
/// subgroup when a chain of endpoints no farther than `radius` apart joins
/// them.
#[derive(Debug, Clone, Copy)]
pub struct ClusterSubgroups {
    pub radius: f64,
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

impl SubgroupPolicy for ClusterSubgroups {
    fn name(&self) -> &'static str {
        "cluster"
    }

    fn partition(&self, segments: Vec<Segment>) -> Vec<Vec<Segment>> {
        let n = segments.len();
        let mut parent: Vec<usize> = (0..n).collect();
        let r2 = self.radius * self.radius;
        for i in 0..n {
            let Some(a) = segments[i].endpoint() else { continue };
            for j in (i + 1)..n {
                let Some(b) = segments[j].endpoint() else { continue };
                if a.len() != b.len() {
                    continue;
                }
                let d2: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
                if d2 <= r2 {
                    let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                    if ri != rj {
                        // keep the earliest index as root so group order is stable
                        let (lo, hi) = if ri < rj { (ri, rj) } else { (rj, ri) };
                        parent[hi] = lo;
                    }
                }
            }
        }

        let roots: Vec<usize> = (0..n).map(|i| find(&mut parent, i)).collect();
        let mut index: AHashMap<usize, usize> = AHashMap::default();
        let mut groups: Vec<Vec<Segment>> = Vec::new();
        for (seg, root) in segments.into_iter().zip(roots) {
            let pos = *index.entry(root).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[pos].push(seg);
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::population::types::SegmentId;

    fn seg(id: u64, x: f64, parent: u64) -> Segment {
        Segment::at_point(SegmentId(id), 0.1, &[x]).with_parent(Parent::Segment(SegmentId(parent)))
    }

    fn ids(groups: &[Vec<Segment>]) -> Vec<Vec<u64>> {
        groups.iter().map(|g| g.iter().map(|s| s.id.0).collect()).collect()
    }

    #[test]
    fn trivial_keeps_everything_together() {
        let groups = TrivialSubgroups.partition(vec![seg(0, 0.0, 0), seg(1, 5.0, 1)]);
        assert_eq!(ids(&groups), vec![vec![0, 1]]);
        assert!(TrivialSubgroups.partition(Vec::new()).is_empty());
    }

    #[test]
    fn lineage_groups_by_parent_in_first_seen_order() {
        let groups = LineageSubgroups.partition(vec![
            seg(0, 0.0, 9),
            seg(1, 0.0, 4),
            seg(2, 0.0, 9),
            seg(3, 0.0, 4),
            seg(4, 0.0, 7),
        ]);
        assert_eq!(ids(&groups), vec![vec![0, 2], vec![1, 3], vec![4]]);
    }

    #[test]
    fn lineage_groups_continued_walkers_by_family() {
        // each walker continues its own predecessor; siblings share a family
        let continued = |id: u64, family: u64| {
            seg(id, 0.0, 20 + id).with_family(Some(Parent::Segment(SegmentId(family))))
        };
        let groups = LineageSubgroups.partition(vec![
            continued(0, 50),
            continued(1, 51),
            continued(2, 50),
            seg(3, 0.0, 7),
        ]);
        assert_eq!(ids(&groups), vec![vec![0, 2], vec![1], vec![3]]);
    }

    #[test]
    fn cluster_links_chains() {
        let policy = ClusterSubgroups { radius: 0.15 };
        let groups = policy.partition(vec![
            seg(0, 0.0, 0),
            seg(1, 1.0, 0),
            seg(2, 0.1, 0),
            seg(3, 0.2, 0),
            seg(4, 1.1, 0),
        ]);
        assert_eq!(ids(&groups), vec![vec![0, 2, 3], vec![1, 4]]);
    }
}
