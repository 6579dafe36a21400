use crate::error::{Error, Result};

/// Encodes text into fixed-width dense vectors.
///
/// `embed` returns one vector per input, in input order, all of the same
/// dimension. Implementations are shared across threads.
pub trait Embedder: Send + Sync {
    /// Identifier of the underlying model, recorded in the vector index.
    fn model_id(&self) -> &str;

    /// Encode paper texts.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Encode search queries. Models with a separate query encoding
    /// (query marker, query-length padding) override this.
    fn embed_query(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed(texts)
    }
}

/// Encode a single query, checking the collaborator kept its contract.
pub fn embed_query_one(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    single(embedder.embed_query(&[text.to_string()])?)
}

fn single(mut out: Vec<Vec<f32>>) -> Result<Vec<f32>> {
    match (out.pop(), out.is_empty()) {
        (Some(v), true) if !v.is_empty() => Ok(v),
        _ => Err(Error::Embedding(
            "embedder returned the wrong number of vectors".to_string(),
        )),
    }
}

/// Scale `v` to unit length in place. All-zero vectors are left as is.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Average of the token rows, ignoring all-zero padding rows.
pub fn mean_pool(rows: &[Vec<f32>]) -> Option<Vec<f32>> {
    let mut live = rows.iter().filter(|r| r.iter().any(|x| *x != 0.0));
    let first = live.next()?;
    let mut sum = first.clone();
    let mut count = 1usize;
    for row in live {
        sum.iter_mut().zip(row).for_each(|(s, x)| *s += x);
        count += 1;
    }
    sum.iter_mut().for_each(|s| *s /= count as f32);
    Some(sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Constant(Vec<Vec<f32>>);

    impl Embedder for Constant {
        fn model_id(&self) -> &str {
            "constant"
        }

        fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn normalize_to_unit_length() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn dot_product() {
        assert_eq!(dot(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]), 32.0);
    }

    #[test]
    fn mean_pool_skips_padding() {
        let rows = vec![vec![1.0, 3.0], vec![0.0, 0.0], vec![3.0, 5.0]];
        assert_eq!(mean_pool(&rows), Some(vec![2.0, 4.0]));
        assert_eq!(mean_pool(&[vec![0.0, 0.0]]), None);
    }

    #[test]
    fn embed_query_one_checks_count() {
        let ok = Constant(vec![vec![1.0]]);
        assert_eq!(embed_query_one(&ok, "x").unwrap(), vec![1.0]);

        let two = Constant(vec![vec![1.0], vec![2.0]]);
        assert!(matches!(embed_query_one(&two, "x"), Err(Error::Embedding(_))));

        let none = Constant(vec![]);
        assert!(embed_query_one(&none, "x").is_err());

        let empty = Constant(vec![vec![]]);
        assert!(embed_query_one(&empty, "x").is_err());
    }
}
