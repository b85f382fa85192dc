//! Exact bipartite matching algorithms on small dense matrices.
//!
//! Rows and columns of the given matrix are the two vertex sets of the bipartite graph. All functions return a
//! [`Matching`], which stores the matched column for each row (or `None` for unmatched rows). A matrix with a zero
//! dimension simply yields a matching without any matched rows.

use ndarray::Array2;
use num_traits::{NumCast, PrimInt, Signed};

/// Return type of the matching algorithms: the matched column index for each row, if any.
pub type Matching = Vec<Option<usize>>;

/// Calculate a maximum cardinality matching, using only the entries with a strictly positive value as edges.
///
/// This is Kuhn's augmenting path algorithm: rows are processed in index order, each one searching for an augmenting
/// path starting with the lowest column index. Thus, ties are broken by row/column scan order.
pub fn max_cardinality_matching<W: PrimInt>(matrix: &Array2<W>) -> Matching {
    let (rows, cols) = matrix.dim();
    let mut row_match: Matching = vec![None; rows];
    if rows == 0 || cols == 0 {
        return row_match;
    }

    let mut col_match: Vec<Option<usize>> = vec![None; cols];
    for r in 0..rows {
        let mut visited = vec![false; cols];
        augment(matrix, r, &mut visited, &mut col_match);
    }
    for (c, r) in col_match.iter().enumerate() {
        if let Some(r) = r {
            row_match[*r] = Some(c);
        }
    }
    row_match
}

/// Depth-first search for an augmenting path starting at row `r`. Returns true, if the path has been found and
/// applied to `col_match`.
fn augment<W: PrimInt>(
    matrix: &Array2<W>,
    r: usize,
    visited: &mut Vec<bool>,
    col_match: &mut Vec<Option<usize>>,
) -> bool {
    for c in 0..matrix.dim().1 {
        if matrix[(r, c)] <= W::zero() || visited[c] {
            continue;
        }
        visited[c] = true;
        let free = match col_match[c] {
            None => true,
            Some(other) => augment(matrix, other, visited, col_match),
        };
        if free {
            col_match[c] = Some(r);
            return true;
        }
    }
    false
}

/// Calculate a matching of minimal total weight, which matches every row (if there are at least as many columns as
/// rows) or every column (otherwise).
///
/// All entries of the matrix are edges, including zero and negative ones. The implementation is the Hungarian method
/// with vertex potentials, running in O(n²·m) for an n×m matrix with n <= m. Matrices with more rows than columns are
/// solved transposed.
///
/// The weights must be small enough, that the sum of all absolute values fits into `W`.
pub fn min_weight_matching<W: PrimInt + Signed>(matrix: &Array2<W>) -> Matching {
    let (rows, cols) = matrix.dim();
    if rows == 0 || cols == 0 {
        return vec![None; rows];
    }
    if rows <= cols {
        hungarian(matrix)
    } else {
        let transposed = matrix.t().to_owned();
        let col_to_row = hungarian(&transposed);
        let mut row_match: Matching = vec![None; rows];
        for (c, r) in col_to_row.iter().enumerate() {
            if let Some(r) = r {
                row_match[*r] = Some(c);
            }
        }
        row_match
    }
}

/// Hungarian method for a matrix with `rows <= cols`. All rows are matched.
fn hungarian<W: PrimInt + Signed>(matrix: &Array2<W>) -> Matching {
    let (n, m) = matrix.dim();
    debug_assert!(n <= m);
    let inf = W::max_value();

    // Potentials and matching of the columns, both 1-indexed; row/column 0 is the virtual start vertex
    let mut u = vec![W::zero(); n + 1];
    let mut v = vec![W::zero(); m + 1];
    let mut p = vec![0usize; m + 1];
    let mut way = vec![0usize; m + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![inf; m + 1];
        let mut used = vec![false; m + 1];
        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = inf;
            let mut j1 = 0usize;
            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let cur = matrix[(i0 - 1, j - 1)] - u[i0] - v[j];
                if cur < minv[j] {
                    minv[j] = cur;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }
            for j in 0..=m {
                if used[j] {
                    u[p[j]] = u[p[j]] + delta;
                    v[j] = v[j] - delta;
                } else {
                    minv[j] = minv[j] - delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }
        // Flip the augmenting path
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut row_match: Matching = vec![None; n];
    for j in 1..=m {
        if p[j] != 0 {
            row_match[p[j] - 1] = Some(j - 1);
        }
    }
    row_match
}

/// Calculate a maximum cardinality matching (using only the entries marked in `edges`) which has the minimal total
/// weight among all maximum cardinality matchings.
///
/// This is reduced to [`min_weight_matching`] by shifting the weight of all edges by a bonus, which is larger than
/// any possible weight difference of two matchings. Thus, every additional matched row outweighs any weight
/// improvement. Rows matched to non-edge entries by the reduction are reported as unmatched.
pub fn min_weight_max_cardinality_matching<W: PrimInt + Signed>(
    weights: &Array2<W>,
    edges: &Array2<bool>,
) -> Matching {
    let (rows, cols) = weights.dim();
    assert_eq!(weights.dim(), edges.dim(), "weights and edges must have the same shape");
    if rows == 0 || cols == 0 {
        return vec![None; rows];
    }

    let max_abs = weights
        .indexed_iter()
        .filter(|(idx, _)| edges[*idx])
        .map(|(_, w)| w.abs())
        .fold(W::zero(), |acc, w| acc.max(w));
    let k = <W as NumCast>::from(rows.min(cols)).unwrap_or_else(W::max_value);
    let two = W::one() + W::one();
    let bonus = two * max_abs * k + W::one();

    let shifted = Array2::from_shape_fn((rows, cols), |idx| {
        if edges[idx] {
            weights[idx] - bonus
        } else {
            W::zero()
        }
    });
    min_weight_matching(&shifted)
        .into_iter()
        .enumerate()
        .map(|(r, c)| c.filter(|c| edges[(r, *c)]))
        .collect()
}

/// Sum up the matrix entries of all matched cells
pub fn matching_value<W: PrimInt>(matrix: &Array2<W>, matching: &Matching) -> W {
    matching
        .iter()
        .enumerate()
        .filter_map(|(r, c)| c.map(|c| matrix[(r, c)]))
        .fold(W::zero(), |acc, w| acc + w)
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::{arr2, Array2};
    use proptest::prelude::*;

    /// Checks that no column is matched twice
    fn assert_valid(matching: &Matching, cols: usize) {
        let mut used = vec![false; cols];
        for c in matching.iter().flatten() {
            assert!(!used[*c], "Column {} is matched twice", c);
            used[*c] = true;
        }
    }

    /// Minimal sum over all assignments of min(rows, cols) distinct pairs
    fn brute_force_min_sum(matrix: &Array2<i64>) -> i64 {
        fn by_rows(m: &Array2<i64>, r: usize, used: &mut Vec<bool>) -> i64 {
            if r == m.dim().0 {
                return 0;
            }
            let mut min = i64::MAX;
            for c in 0..m.dim().1 {
                if !used[c] {
                    used[c] = true;
                    min = min.min(m[(r, c)] + by_rows(m, r + 1, used));
                    used[c] = false;
                }
            }
            min
        }
        let (rows, cols) = matrix.dim();
        if rows <= cols {
            by_rows(matrix, 0, &mut vec![false; cols])
        } else {
            let t = matrix.t().to_owned();
            by_rows(&t, 0, &mut vec![false; rows])
        }
    }

    /// (cardinality, weight) of the best matching w.r.t. maximum cardinality first and minimum weight second
    fn brute_force_card_weight(weights: &Array2<i64>, edges: &Array2<bool>) -> (usize, i64) {
        fn rec(w: &Array2<i64>, e: &Array2<bool>, r: usize, used: &mut Vec<bool>) -> (usize, i64) {
            if r == w.dim().0 {
                return (0, 0);
            }
            let mut best = rec(w, e, r + 1, used);
            for c in 0..w.dim().1 {
                if e[(r, c)] && !used[c] {
                    used[c] = true;
                    let (card, weight) = rec(w, e, r + 1, used);
                    used[c] = false;
                    let candidate = (card + 1, weight + w[(r, c)]);
                    if candidate.0 > best.0 || (candidate.0 == best.0 && candidate.1 < best.1) {
                        best = candidate;
                    }
                }
            }
            best
        }
        rec(weights, edges, 0, &mut vec![false; weights.dim().1])
    }

    fn matrix_strategy(
        max_dim: usize,
        values: std::ops::RangeInclusive<i64>,
    ) -> impl Strategy<Value = Array2<i64>> {
        (1..=max_dim, 1..=max_dim).prop_flat_map(move |(rows, cols)| {
            proptest::collection::vec(values.clone(), rows * cols)
                .prop_map(move |data| Array2::from_shape_vec((rows, cols), data).unwrap())
        })
    }

    #[test]
    fn zero_dimensions() {
        let m = Array2::<i64>::zeros((3, 0));
        assert_eq!(max_cardinality_matching(&m), vec![None, None, None]);
        assert_eq!(min_weight_matching(&m), vec![None, None, None]);
        let e = Array2::from_elem((3, 0), false);
        assert_eq!(min_weight_max_cardinality_matching(&m, &e), vec![None, None, None]);

        let m = Array2::<i64>::zeros((0, 4));
        assert_eq!(max_cardinality_matching(&m), Vec::<Option<usize>>::new());
        assert_eq!(min_weight_matching(&m), Vec::<Option<usize>>::new());
    }

    #[test]
    fn simple_max_cardinality() {
        // Row 0 would grab column 0 first, but must give it up for row 1
        let m = arr2(&[[1, 1, 0], [1, 0, 0], [0, 0, 0]]);
        let matching = max_cardinality_matching(&m);
        assert_eq!(matching, vec![Some(1), Some(0), None]);
    }

    #[test]
    fn simple_min_weight() {
        let m = arr2(&[[4, 1, 3], [2, 0, 5], [3, 2, 2]]);
        let matching = min_weight_matching(&m);
        assert_valid(&matching, 3);
        assert_eq!(matching_value(&m, &matching), 5);

        // More rows than columns: only two rows can be matched
        let m = arr2(&[[7, 1], [2, 8], [0, 0]]);
        let matching = min_weight_matching(&m);
        assert_valid(&matching, 2);
        assert_eq!(matching.iter().flatten().count(), 2);
        assert_eq!(matching_value(&m, &matching), 1);
    }

    #[test]
    fn weighted_prefers_cardinality() {
        // Matching row 0 to its cheap column 0 would leave row 1 without a partner
        let w = arr2(&[[1, 100], [5, 0]]);
        let e = arr2(&[[true, true], [true, false]]);
        let matching = min_weight_max_cardinality_matching(&w, &e);
        assert_eq!(matching, vec![Some(1), Some(0)]);
    }

    proptest! {
        #[test]
        fn max_cardinality_equals_negated_min_weight(m in matrix_strategy(10, 0..=1)) {
            let a = max_cardinality_matching(&m);
            assert_valid(&a, m.dim().1);
            for (r, c) in a.iter().enumerate() {
                if let Some(c) = c {
                    prop_assert!(m[(r, *c)] > 0);
                }
            }
            let negated = m.mapv(|x| -x);
            let b = min_weight_matching(&negated);
            assert_valid(&b, m.dim().1);
            prop_assert_eq!(matching_value(&m, &a), -matching_value(&negated, &b));
        }

        #[test]
        fn min_weight_equals_brute_force(m in matrix_strategy(7, -9..=9)) {
            let matching = min_weight_matching(&m);
            assert_valid(&matching, m.dim().1);
            let (rows, cols) = m.dim();
            prop_assert_eq!(matching.iter().flatten().count(), rows.min(cols));
            prop_assert_eq!(matching_value(&m, &matching), brute_force_min_sum(&m));
        }

        #[test]
        fn weighted_equals_brute_force(
            w in matrix_strategy(5, 0..=9),
            seed in proptest::collection::vec(any::<bool>(), 25),
        ) {
            let (rows, cols) = w.dim();
            let e = Array2::from_shape_fn((rows, cols), |(r, c)| seed[r * cols + c]);
            let matching = min_weight_max_cardinality_matching(&w, &e);
            assert_valid(&matching, cols);
            for (r, c) in matching.iter().enumerate() {
                if let Some(c) = c {
                    prop_assert!(e[(r, *c)]);
                }
            }
            let (card, weight) = brute_force_card_weight(&w, &e);
            prop_assert_eq!(matching.iter().flatten().count(), card);
            prop_assert_eq!(matching_value(&w, &matching), weight);
        }
    }
}
