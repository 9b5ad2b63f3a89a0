use crate::error::TrackError::{self, LapjvError};
use nalgebra::DMatrix;

/* -----------------------------------------------------------------------------
 * lapjv.rs - Jonker-Volgenant optimal assignment
 *
 * Dense solver over a flat row-major cost matrix, plus the score-maximizing
 * rectangular front-end used by the association stages.
 * ----------------------------------------------------------------------------- */

const LARGE: f64 = 1000000.0;

struct JvSolver {
    n: usize,
    cost: Vec<f64>,
    /// x[i] = column assigned to row i, -1 if free.
    x: Vec<isize>,
    /// y[j] = row assigned to column j, -1 if free.
    y: Vec<isize>,
    /// Column dual prices.
    v: Vec<f64>,
    free_rows: Vec<usize>,
}

impl JvSolver {
    fn new(n: usize, cost: Vec<f64>) -> Self {
        debug_assert!(cost.len() == n * n);
        Self {
            n,
            cost,
            x: vec![-1; n],
            y: vec![-1; n],
            v: vec![0.0; n],
            free_rows: vec![0; n],
        }
    }

    #[inline]
    fn c(&self, i: usize, j: usize) -> f64 {
        self.cost[i * self.n + j]
    }

    /// Column reduction and reduction transfer. Returns the number of rows
    /// left unassigned, collected into `free_rows`.
    fn column_reduction(&mut self) -> usize {
        let n = self.n;
        for j in 0..n {
            self.x[j] = -1;
            self.v[j] = LARGE;
            self.y[j] = 0;
        }
        for i in 0..n {
            for j in 0..n {
                let c = self.c(i, j);
                if c < self.v[j] {
                    self.v[j] = c;
                    self.y[j] = i as isize;
                }
            }
        }

        // Walk columns high to low so each row keeps its lowest-index column.
        let mut unique = vec![true; n];
        let mut j = n;
        while j > 0 {
            j -= 1;
            let i = self.y[j] as usize;
            if self.x[i] < 0 {
                self.x[i] = j as isize;
            } else {
                unique[i] = false;
                self.y[j] = -1;
            }
        }

        let mut n_free = 0;
        for i in 0..n {
            if self.x[i] < 0 {
                self.free_rows[n_free] = i;
                n_free += 1;
            } else if unique[i] {
                let j = self.x[i] as usize;
                let mut min = LARGE;
                for j2 in 0..n {
                    if j2 == j {
                        continue;
                    }
                    let c = self.c(i, j2) - self.v[j2];
                    if c < min {
                        min = c;
                    }
                }
                self.v[j] -= min;
            }
        }
        n_free
    }

    /// One pass of augmenting row reduction over the current free rows.
    /// Returns the number of rows still free afterwards.
    fn augmenting_row_reduction(&mut self, n_free: usize) -> usize {
        let n = self.n;
        let mut current = 0;
        let mut new_free = 0;
        let mut rr_cnt = 0;

        while current < n_free {
            rr_cnt += 1;
            let free_i = self.free_rows[current];
            current += 1;

            // Lowest and second-lowest reduced cost over columns of free_i.
            let mut j1 = 0isize;
            let mut j2 = -1isize;
            let mut v1 = self.c(free_i, 0) - self.v[0];
            let mut v2 = LARGE;
            for j in 1..n {
                let c = self.c(free_i, j) - self.v[j];
                if c < v2 {
                    if c >= v1 {
                        v2 = c;
                        j2 = j as isize;
                    } else {
                        v2 = v1;
                        v1 = c;
                        j2 = j1;
                        j1 = j as isize;
                    }
                }
            }

            let mut i0 = self.y[j1 as usize];
            let v1_new = self.v[j1 as usize] - (v2 - v1);
            let v1_lowers = v1_new < self.v[j1 as usize];

            if rr_cnt < current * n {
                if v1_lowers {
                    self.v[j1 as usize] = v1_new;
                } else if i0 >= 0 && j2 >= 0 {
                    j1 = j2;
                    i0 = self.y[j2 as usize];
                }
                if i0 >= 0 {
                    if v1_lowers {
                        current -= 1;
                        self.free_rows[current] = i0 as usize;
                    } else {
                        self.free_rows[new_free] = i0 as usize;
                        new_free += 1;
                    }
                }
            } else if i0 >= 0 {
                self.free_rows[new_free] = i0 as usize;
                new_free += 1;
            }
            self.x[free_i] = j1;
            self.y[j1 as usize] = free_i as isize;
        }
        new_free
    }

    /// Move the columns with minimal tentative distance `d` to the front of
    /// the TODO part of `cols`, returning the new boundary.
    fn partition_by_min(&self, lo: usize, d: &[f64], cols: &mut [usize]) -> usize {
        let mut hi = lo + 1;
        let mut mind = d[cols[lo]];
        for k in hi..self.n {
            let j = cols[k];
            if d[j] <= mind {
                if d[j] < mind {
                    hi = lo;
                    mind = d[j];
                }
                cols[k] = cols[hi];
                cols[hi] = j;
                hi += 1;
            }
        }
        hi
    }

    /// Scan the ready columns, relaxing distances of the TODO columns.
    /// Returns a free column index when one becomes reachable at the current
    /// minimum, -1 otherwise.
    fn scan_ready(
        &self,
        plo: &mut usize,
        phi: &mut usize,
        d: &mut [f64],
        cols: &mut [usize],
        pred: &mut [usize],
    ) -> isize {
        let mut lo = *plo;
        let mut hi = *phi;

        while lo != hi {
            let mut j = cols[lo];
            lo += 1;

            let i = self.y[j] as usize;
            let mind = d[j];
            let h = self.c(i, j) - self.v[j] - mind;

            for k in hi..self.n {
                j = cols[k];
                let cred_ij = self.c(i, j) - self.v[j] - h;
                if cred_ij < d[j] {
                    d[j] = cred_ij;
                    pred[j] = i;
                    if cred_ij == mind {
                        if self.y[j] < 0 {
                            return j as isize;
                        }
                        cols[k] = cols[hi];
                        cols[hi] = j;
                        hi += 1;
                    }
                }
            }
        }
        *plo = lo;
        *phi = hi;
        -1
    }

    /// Dijkstra-style shortest augmenting path from `start_i` to a free
    /// column, updating the dual prices of the ready columns.
    fn shortest_path(&mut self, start_i: usize, pred: &mut [usize]) -> isize {
        let n = self.n;
        let mut lo = 0;
        let mut hi = 0;
        let mut final_j = -1;
        let mut n_ready = 0;
        let mut cols: Vec<usize> = (0..n).collect();
        let mut d = vec![0.0; n];

        for j in 0..n {
            pred[j] = start_i;
            d[j] = self.c(start_i, j) - self.v[j];
        }

        while final_j == -1 {
            if lo == hi {
                n_ready = lo;
                hi = self.partition_by_min(lo, &d, &mut cols);
                for k in lo..hi {
                    let j = cols[k];
                    if self.y[j] < 0 {
                        final_j = j as isize;
                    }
                }
            }
            if final_j == -1 {
                final_j =
                    self.scan_ready(&mut lo, &mut hi, &mut d, &mut cols, pred);
            }
        }

        let mind = d[cols[lo]];
        for k in 0..n_ready {
            let j = cols[k];
            self.v[j] += d[j] - mind;
        }
        final_j
    }

    /// Augment along shortest paths until every free row is assigned.
    fn augment_free_rows(&mut self, n_free: usize) {
        let n = self.n;
        let mut pred = vec![0; n];

        for row_n in 0..n_free {
            let free_row = self.free_rows[row_n];
            let mut i = -1isize;
            let mut k = 0;

            let mut j = self.shortest_path(free_row, &mut pred);
            debug_assert!(j >= 0 && j < n as isize);
            while i != free_row as isize {
                i = pred[j as usize] as isize;
                self.y[j as usize] = i;

                std::mem::swap(&mut j, &mut self.x[i as usize]);

                k += 1;
                debug_assert!(k <= n);
            }
        }
    }

    fn solve(&mut self) -> Result<(), TrackError> {
        let mut free = self.column_reduction();
        let mut i = 0;
        while free > 0 && i < 2 {
            free = self.augmenting_row_reduction(free);
            i += 1;
        }
        if free > 0 {
            self.augment_free_rows(free);
        }
        if self.x.iter().any(|&j| j < 0) {
            return Err(LapjvError(
                "augmentation finished with unassigned rows".to_string(),
            ));
        }
        Ok(())
    }
}

/// Maximum-total-score assignment over a rectangular score matrix with rows
/// as detections and columns as tracks.
///
/// The matrix is padded square with zero-score entries and solved by
/// minimizing negated scores, so every returned pair is a real
/// (row, column) cell and exactly `min(nrows, ncols)` pairs come back.
/// Pairs below any acceptance threshold are the caller's business.
pub(crate) fn assignment_by_score(
    scores: &DMatrix<f32>,
) -> Result<Vec<(usize, usize)>, TrackError> {
    let rows = scores.nrows();
    let cols = scores.ncols();
    if rows == 0 || cols == 0 {
        return Ok(vec![]);
    }

    let n = rows.max(cols);
    let mut cost = vec![0.0f64; n * n];
    for i in 0..rows {
        for j in 0..cols {
            cost[i * n + j] = -(scores[(i, j)] as f64);
        }
    }

    let mut solver = JvSolver::new(n, cost);
    solver.solve()?;

    let mut pairs = Vec::with_capacity(rows.min(cols));
    for (i, &j) in solver.x.iter().enumerate().take(rows) {
        let j = j as usize;
        if j < cols {
            pairs.push((i, j));
        }
    }
    if pairs.len() != rows.min(cols) {
        return Err(TrackError::AssignmentError(format!(
            "expected {} assignment pairs, got {}",
            rows.min(cols),
            pairs.len()
        )));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::{Arbitrary, Gen};
    use rand::{self, Rng};

    fn solve_square(cost: Vec<Vec<f64>>) -> JvSolver {
        let n = cost.len();
        let flat: Vec<f64> = cost.into_iter().flatten().collect();
        let mut solver = JvSolver::new(n, flat);
        solver.solve().unwrap();
        solver
    }

    fn total_cost(solver: &JvSolver) -> f64 {
        (0..solver.n)
            .map(|i| solver.c(i, solver.x[i] as usize))
            .sum()
    }

    /// Brute-force optimum over all permutations, for small n.
    fn brute_force_min(cost: &[Vec<f64>]) -> f64 {
        fn rec(cost: &[Vec<f64>], i: usize, used: &mut Vec<bool>) -> f64 {
            if i == cost.len() {
                return 0.0;
            }
            let mut best = f64::INFINITY;
            for j in 0..cost.len() {
                if !used[j] {
                    used[j] = true;
                    let c = cost[i][j] + rec(cost, i + 1, used);
                    if c < best {
                        best = c;
                    }
                    used[j] = false;
                }
            }
            best
        }
        rec(cost, 0, &mut vec![false; cost.len()])
    }

    fn assert_valid_permutation(solver: &JvSolver) {
        let mut seen = vec![false; solver.n];
        for i in 0..solver.n {
            let j = solver.x[i];
            assert!(j >= 0 && (j as usize) < solver.n);
            assert!(!seen[j as usize], "column {} assigned twice", j);
            seen[j as usize] = true;
            assert_eq!(solver.y[j as usize], i as isize);
        }
    }

    #[test]
    fn test_solver_2x2() {
        let solver = solve_square(vec![vec![4.0, 1.0], vec![2.0, 3.0]]);
        assert_eq!(solver.x, vec![1, 0]);
        assert_eq!(solver.y, vec![1, 0]);
    }

    #[test]
    fn test_solver_3x3_optimal() {
        let cost = vec![
            vec![10.0, 2.0, 8.0],
            vec![7.0, 9.0, 1.0],
            vec![3.0, 6.0, 5.0],
        ];
        let solver = solve_square(cost.clone());
        assert_valid_permutation(&solver);
        assert_eq!(total_cost(&solver), brute_force_min(&cost));
        // 2 + 1 + 3
        assert_eq!(total_cost(&solver), 6.0);
    }

    #[test]
    fn test_solver_5x5_optimal() {
        let cost = vec![
            vec![13.0, 4.0, 7.0, 6.0, 2.0],
            vec![1.0, 11.0, 5.0, 4.0, 9.0],
            vec![6.0, 7.0, 2.0, 8.0, 3.0],
            vec![1.0, 3.0, 5.0, 9.0, 7.0],
            vec![10.0, 12.0, 5.0, 9.0, 6.0],
        ];
        let solver = solve_square(cost.clone());
        assert_valid_permutation(&solver);
        assert_eq!(total_cost(&solver), brute_force_min(&cost));
    }

    #[test]
    fn test_solver_degenerate_all_equal() {
        let solver = solve_square(vec![vec![1.0; 4]; 4]);
        assert_valid_permutation(&solver);
        assert_eq!(total_cost(&solver), 4.0);
    }

    #[test]
    fn test_assignment_empty() {
        let scores = DMatrix::<f32>::zeros(0, 3);
        assert!(assignment_by_score(&scores).unwrap().is_empty());
        let scores = DMatrix::<f32>::zeros(3, 0);
        assert!(assignment_by_score(&scores).unwrap().is_empty());
    }

    #[test]
    fn test_assignment_square_picks_best() {
        let scores =
            DMatrix::from_row_slice(2, 2, &[0.9f32, 0.1, 0.2, 0.8]);
        let mut pairs = assignment_by_score(&scores).unwrap();
        pairs.sort();
        assert_eq!(pairs, vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn test_assignment_wide_pads_rows() {
        // 1 detection, 3 tracks: the single pair must hit the best column.
        let scores = DMatrix::from_row_slice(1, 3, &[0.1f32, 0.7, 0.3]);
        let pairs = assignment_by_score(&scores).unwrap();
        assert_eq!(pairs, vec![(0, 1)]);
    }

    #[test]
    fn test_assignment_tall_pads_cols() {
        // 3 detections, 1 track.
        let scores = DMatrix::from_row_slice(3, 1, &[0.2f32, 0.05, 0.6]);
        let pairs = assignment_by_score(&scores).unwrap();
        assert_eq!(pairs, vec![(2, 0)]);
    }

    #[test]
    fn test_assignment_crossed_scores() {
        // Greedy would take (0,0)=0.6 then be stuck with (1,1)=0.0;
        // the optimum crosses over.
        let scores =
            DMatrix::from_row_slice(2, 2, &[0.6f32, 0.5, 0.5, 0.0]);
        let mut pairs = assignment_by_score(&scores).unwrap();
        pairs.sort();
        assert_eq!(pairs, vec![(0, 1), (1, 0)]);
    }

    fn gen_scores(rows: usize, cols: usize, g: &mut Gen) -> DMatrix<f32> {
        DMatrix::from_fn(rows, cols, |_, _| {
            let raw = f32::arbitrary(g);
            if raw.is_finite() {
                raw.abs() % 1.0
            } else {
                0.0
            }
        })
    }

    #[test]
    fn test_quickcheck_assignment_is_partial_matching() {
        fn prop(_: usize) -> bool {
            let mut rng = rand::thread_rng();
            let rows = rng.gen_range(1..=30);
            let cols = rng.gen_range(1..=30);
            let scores = gen_scores(rows, cols, &mut Gen::new(rng.r#gen()));

            let pairs = match assignment_by_score(&scores) {
                Ok(p) => p,
                Err(_) => return false,
            };
            if pairs.len() != rows.min(cols) {
                return false;
            }
            let mut rows_seen = vec![false; rows];
            let mut cols_seen = vec![false; cols];
            for &(i, j) in &pairs {
                if i >= rows || j >= cols || rows_seen[i] || cols_seen[j] {
                    return false;
                }
                rows_seen[i] = true;
                cols_seen[j] = true;
            }
            true
        }
        quickcheck::quickcheck(prop as fn(usize) -> bool);
    }
}
