//! Density clustering over a precomputed distance matrix.
//!
//! HDBSCAN with leaf selection and a cluster-selection epsilon:
//!
//! 1. core distance: distance to the `min_samples`-th nearest other point
//! 2. mutual reachability `max(core_i, core_j, d_ij)`
//! 3. minimum spanning tree (Prim, dense)
//! 4. single-linkage hierarchy, condensed with `min_cluster_size`
//! 5. leaves of the condensed cluster tree, merged upward while they were
//!    born below `selection_epsilon`
//!
//! Points not under a selected cluster get [`NOISE`]; [`repair_outliers`]
//! then assigns every one of them a real cluster id.

use crate::config::ClusteringConfig;
use crate::types::NOISE;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Symmetric matrix of `1 - cosine similarity`, zero diagonal.
///
/// Zero vectors have similarity 0 to everything.
pub fn cosine_distance_matrix(vectors: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = vectors.len();
    let norms: Vec<f64> = vectors
        .iter()
        .map(|v| v.iter().map(|x| x * x).sum::<f64>().sqrt())
        .collect();

    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let similarity = if norms[i] == 0.0 || norms[j] == 0.0 {
                0.0
            } else {
                let dot: f64 = vectors[i].iter().zip(&vectors[j]).map(|(a, b)| a * b).sum();
                dot / (norms[i] * norms[j])
            };
            let d = (1.0 - similarity).clamp(0.0, 2.0);
            matrix[i][j] = d;
            matrix[j][i] = d;
        }
    }
    matrix
}

/// `min(2, n - 1)`, never below 1.
pub fn min_cluster_size_for(n: usize) -> usize {
    2.min(n.saturating_sub(1)).max(1)
}

/// Cluster a distance matrix and repair outliers: the labels a snapshot stores.
pub fn assign_clusters(distances: &[Vec<f64>], config: &ClusteringConfig) -> Vec<i32> {
    let params = DensityParams {
        min_cluster_size: min_cluster_size_for(distances.len()),
        min_samples: config.min_samples,
        selection_epsilon: config.selection_epsilon,
    };
    let mut labels = hdbscan(distances, &params);
    let noise = labels.iter().filter(|l| **l == NOISE).count();
    if noise > 0 {
        tracing::debug!(points = labels.len(), noise, "Repairing outliers");
        repair_outliers(&mut labels, distances);
    }
    labels
}

#[derive(Debug, Clone, PartialEq)]
pub struct DensityParams {
    pub min_cluster_size: usize,
    pub min_samples: usize,
    pub selection_epsilon: f64,
}

/// Raw HDBSCAN labels, [`NOISE`] for unassigned points.
///
/// Cluster ids are dense, `0..k`, numbered in condensed-tree order.
pub fn hdbscan(distances: &[Vec<f64>], params: &DensityParams) -> Vec<i32> {
    let n = distances.len();
    if n < 2 {
        return vec![NOISE; n];
    }

    let core = core_distances(distances, params.min_samples);
    let mst = minimum_spanning_tree(distances, &core);
    let hierarchy = single_linkage(mst, n);
    let condensed = condense(&hierarchy, n, params.min_cluster_size.max(1));
    let selected = select_leaf_clusters(&condensed, n, params.selection_epsilon);
    label_points(&condensed, &selected, n)
}

fn core_distances(distances: &[Vec<f64>], min_samples: usize) -> Vec<f64> {
    let n = distances.len();
    let k = min_samples.max(1).min(n - 1);
    distances
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let mut others: Vec<f64> = row
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, d)| *d)
                .collect();
            others.sort_by(f64::total_cmp);
            others[k - 1]
        })
        .collect()
}

/// Dense Prim over mutual reachability; ties go to the lowest index.
fn minimum_spanning_tree(distances: &[Vec<f64>], core: &[f64]) -> Vec<(usize, usize, f64)> {
    let n = distances.len();
    let reach = |i: usize, j: usize| distances[i][j].max(core[i]).max(core[j]);

    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    let mut from = vec![0usize; n];
    let mut edges = Vec::with_capacity(n - 1);

    in_tree[0] = true;
    for j in 1..n {
        best[j] = reach(0, j);
    }

    for _ in 1..n {
        let mut next = None;
        for j in 0..n {
            if in_tree[j] {
                continue;
            }
            match next {
                Some(k) if best[k] <= best[j] => {}
                _ => next = Some(j),
            }
        }
        let Some(j) = next else { break };

        in_tree[j] = true;
        edges.push((from[j], j, best[j]));
        for k in 0..n {
            if !in_tree[k] {
                let d = reach(j, k);
                if d < best[k] {
                    best[k] = d;
                    from[k] = j;
                }
            }
        }
    }

    edges
}

/// One merge of the single-linkage tree; node id is `n + index`.
#[derive(Debug, Clone, Copy)]
struct Merge {
    left: usize,
    right: usize,
    distance: f64,
    size: usize,
}

fn single_linkage(mut mst: Vec<(usize, usize, f64)>, n: usize) -> Vec<Merge> {
    mst.sort_by(|a, b| a.2.total_cmp(&b.2));

    let mut parent: Vec<usize> = (0..2 * n - 1).collect();
    let mut size = vec![1usize; 2 * n - 1];
    let mut merges = Vec::with_capacity(n - 1);

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        let mut root = x;
        while parent[root] != root {
            root = parent[root];
        }
        while parent[x] != root {
            let next = parent[x];
            parent[x] = root;
            x = next;
        }
        root
    }

    for (a, b, distance) in mst {
        let left = find(&mut parent, a);
        let right = find(&mut parent, b);
        let node = n + merges.len();
        parent[left] = node;
        parent[right] = node;
        size[node] = size[left] + size[right];
        merges.push(Merge {
            left,
            right,
            distance,
            size: size[node],
        });
    }

    merges
}

/// Edge of the condensed tree: a cluster or a point leaving `parent` at `lambda`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CondensedEdge {
    parent: usize,
    child: usize,
    lambda: f64,
    child_size: usize,
}

fn node_size(hierarchy: &[Merge], n: usize, node: usize) -> usize {
    if node < n {
        1
    } else {
        hierarchy[node - n].size
    }
}

/// Level-order walk of the single-linkage tree below `root`.
fn bfs(hierarchy: &[Merge], n: usize, root: usize) -> Vec<usize> {
    let mut order = Vec::new();
    let mut queue = VecDeque::from([root]);
    while let Some(node) = queue.pop_front() {
        order.push(node);
        if node >= n {
            let merge = hierarchy[node - n];
            queue.push_back(merge.left);
            queue.push_back(merge.right);
        }
    }
    order
}

fn condense(hierarchy: &[Merge], n: usize, min_cluster_size: usize) -> Vec<CondensedEdge> {
    let root = 2 * n - 2;
    let mut relabel = vec![0usize; 2 * n - 1];
    relabel[root] = n;
    let mut next_label = n + 1;
    let mut ignore = vec![false; 2 * n - 1];
    let mut edges = Vec::new();

    for node in bfs(hierarchy, n, root) {
        if ignore[node] || node < n {
            continue;
        }
        let merge = hierarchy[node - n];
        let lambda = if merge.distance > 0.0 {
            1.0 / merge.distance
        } else {
            f64::INFINITY
        };
        let parent = relabel[node];
        let left_size = node_size(hierarchy, n, merge.left);
        let right_size = node_size(hierarchy, n, merge.right);

        let fall_out =|child: usize, ignore: &mut Vec<bool>, edges: &mut Vec<CondensedEdge>| {
            for sub in bfs(hierarchy, n, child) {
                if sub < n {
                    edges.push(CondensedEdge {
                        parent,
                        child: sub,
                        lambda,
                        child_size: 1,
                    });
                }
                ignore[sub] = true;
            }
        };

        match (left_size >= min_cluster_size, right_size >= min_cluster_size) {
            (true, true) => {
                for (child, child_size) in [(merge.left, left_size), (merge.right, right_size)] {
                    relabel[child] = next_label;
                    edges.push(CondensedEdge {
                        parent,
                        child: next_label,
                        lambda,
                        child_size,
                    });
                    next_label += 1;
                }
            }
            (false, false) => {
                fall_out(merge.left, &mut ignore, &mut edges);
                fall_out(merge.right, &mut ignore, &mut edges);
            }
            (false, true) => {
                relabel[merge.right] = parent;
                fall_out(merge.left, &mut ignore, &mut edges);
            }
            (true, false) => {
                relabel[merge.left] = parent;
                fall_out(merge.right, &mut ignore, &mut edges);
            }
        }
    }

    edges
}

/// Leaf selection with the epsilon merge. Returns condensed-tree cluster labels.
fn select_leaf_clusters(condensed: &[CondensedEdge], n: usize, epsilon: f64) -> BTreeSet<usize> {
    let root = n;
    // Only real clusters (more than one point) form the cluster tree.
    let tree: Vec<&CondensedEdge> = condensed.iter().filter(|e| e.child_size > 1).collect();

    let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut birth: HashMap<usize, (usize, f64)> = HashMap::new();
    for edge in &tree {
        children.entry(edge.parent).or_default().push(edge.child);
        birth.insert(edge.child, (edge.parent, edge.lambda));
    }

    if tree.is_empty() {
        return BTreeSet::new();
    }

    // Depth-first leaves, in tree order.
    let mut leaves = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        match children.get(&node) {
            Some(kids) => stack.extend(kids.iter().rev()),
            None => leaves.push(node),
        }
    }

    let eps_of = |cluster: usize| -> f64 {
        birth
            .get(&cluster)
            .map(|(_, lambda)| 1.0 / lambda)
            .unwrap_or(f64::INFINITY)
    };

    if epsilon <= 0.0 {
        return leaves.into_iter().collect();
    }

    let mut selected = BTreeSet::new();
    let mut processed: HashSet<usize> = HashSet::new();

    for leaf in leaves {
        if eps_of(leaf) >= epsilon {
            selected.insert(leaf);
            continue;
        }
        if processed.contains(&leaf) {
            continue;
        }

        let mut chosen = leaf;
        while let Some(&(parent, _)) = birth.get(&chosen) {
            if parent == root {
                break;
            }
            if eps_of(parent) > epsilon {
                chosen = parent;
                break;
            }
            chosen = parent;
        }
        selected.insert(chosen);

        let mut stack: Vec<usize> = children.get(&chosen).cloned().unwrap_or_default();
        while let Some(node) = stack.pop() {
            processed.insert(node);
            if let Some(kids) = children.get(&node) {
                stack.extend(kids);
            }
        }
    }

    selected
}

/// Label each point with its nearest selected ancestor, ids in sorted order.
fn label_points(condensed: &[CondensedEdge], selected: &BTreeSet<usize>, n: usize) -> Vec<i32> {
    let root = n;
    let ids: HashMap<usize, i32> = selected
        .iter()
        .enumerate()
        .map(|(id, cluster)| (*cluster, id as i32))
        .collect();

    let mut point_parent: HashMap<usize, usize> = HashMap::new();
    let mut cluster_parent: HashMap<usize, usize> = HashMap::new();
    for edge in condensed {
        if edge.child_size == 1 && edge.child < n {
            point_parent.insert(edge.child, edge.parent);
        } else {
            cluster_parent.insert(edge.child, edge.parent);
        }
    }

    (0..n)
        .map(|point| {
            let mut current = point_parent.get(&point).copied();
            while let Some(cluster) = current {
                if let Some(id) = ids.get(&cluster) {
                    return *id;
                }
                if cluster == root {
                    break;
                }
                current = cluster_parent.get(&cluster).copied();
            }
            NOISE
        })
        .collect()
}

/// Give every [`NOISE`] point a real cluster.
///
/// Each outlier joins the valid cluster with the lowest mean distance to it;
/// ties go to the lowest cluster id. When no valid cluster exists, outliers
/// get fresh ids one by one (`max + 1`, or 0).
pub fn repair_outliers(labels: &mut [i32], distances: &[Vec<f64>]) {
    let valid: BTreeSet<i32> = labels.iter().copied().filter(|l| *l != NOISE).collect();
    let members: Vec<(i32, Vec<usize>)> = valid
        .iter()
        .map(|&cluster| {
            let idx = labels
                .iter()
                .enumerate()
                .filter(|(_, l)| **l == cluster)
                .map(|(i, _)| i)
                .collect();
            (cluster, idx)
        })
        .collect();

    for point in 0..labels.len() {
        if labels[point] != NOISE {
            continue;
        }

        if members.is_empty() {
            let next = labels.iter().copied().max().map(|m| m + 1).unwrap_or(0).max(0);
            labels[point] = next;
            continue;
        }

        let mut nearest: Option<(i32, f64)> = None;
        for (cluster, idx) in &members {
            let mean = idx.iter().map(|&j| distances[point][j]).sum::<f64>() / idx.len() as f64;
            match nearest {
                Some((_, best)) if mean >= best => {}
                _ => nearest = Some((*cluster, mean)),
            }
        }
        if let Some((cluster, _)) = nearest {
            labels[point] = cluster;
        }
    }
}
