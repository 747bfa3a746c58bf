//! Text formats exchanged with the external solver.
//!
//! `causal.fg` holds the factor graph: a factor count, then for every factor a
//! blank line, the variable count, variable ids, cardinalities, the number of
//! non-zero entries and one `<linear-index> <probability>` line per entry. The
//! linear index is mixed radix over the listed cardinalities with the first
//! variable least significant.
//!
//! The list files are line oriented: `priors.list` carries
//! `<id>\t<n>\t<v0>\t<p0>...`, `params.list` names the learnable prior
//! variables, `obs.list` carries `<var> <0|1>`, `query.list` one variable per
//! line; the solver answers with `weights.list`
//! (`<param> <p0> <p1> ...`) and `prediction.list` (`<var> <prob>`).

use std::io::Write as _;
use std::path::Path;

use crate::error::{EncodeError, EncodeResult, SolverError, SolverResult};
use crate::prior::Categorical01;

/// One factor: its variables, their cardinalities and the non-zero table entries.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorBlock {
    pub vars: Vec<usize>,
    pub cards: Vec<usize>,
    pub entries: Vec<(usize, f64)>,
}

impl FactorBlock {
    /// Number of rows in the dense table.
    pub fn table_size(&self) -> usize {
        self.cards.iter().product()
    }

    /// Linear index of a joint state (one state per listed variable).
    pub fn index_of(&self, states: &[usize]) -> usize {
        let mut index = 0;
        let mut stride = 1;
        for (&s, &card) in states.iter().zip(&self.cards) {
            index += s * stride;
            stride *= card;
        }
        index
    }

    /// Inverse of [`index_of`](Self::index_of).
    pub fn assignment(&self, mut index: usize) -> Vec<usize> {
        self.cards
            .iter()
            .map(|&card| {
                let s = index % card;
                index /= card;
                s
            })
            .collect()
    }

    /// Table value at a joint state; omitted entries are zero.
    pub fn value(&self, states: &[usize]) -> f64 {
        let index = self.index_of(states);
        self.entries
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, p)| *p)
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactorGraph {
    pub factors: Vec<FactorBlock>,
}

impl FactorGraph {
    pub fn write_to(&self, w: &mut impl std::io::Write) -> std::io::Result<()> {
        writeln!(w, "{}", self.factors.len())?;
        for f in &self.factors {
            writeln!(w)?;
            writeln!(w, "{}", f.vars.len())?;
            writeln!(w, "{}", join(&f.vars))?;
            writeln!(w, "{}", join(&f.cards))?;
            writeln!(w, "{}", f.entries.len())?;
            for (i, p) in &f.entries {
                writeln!(w, "{i} {p}")?;
            }
        }
        Ok(())
    }

    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn save(&self, path: &Path) -> EncodeResult<()> {
        let io_err = |e| EncodeError::Io {
            path: path.display().to_string(),
            source: e,
        };
        let file = std::fs::File::create(path).map_err(io_err)?;
        let mut w = std::io::BufWriter::new(file);
        self.write_to(&mut w).map_err(io_err)?;
        w.flush().map_err(io_err)
    }

    pub fn parse(text: &str) -> EncodeResult<Self> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty());

        let mut next = |what: &str| {
            lines.next().ok_or_else(|| EncodeError::Malformed {
                line: 0,
                message: format!("unexpected end of file, expected {what}"),
            })
        };

        let (line, head) = next("factor count")?;
        let count: usize = parse_num(head, line)?;
        let mut factors = Vec::with_capacity(count);
        for _ in 0..count {
            let (line, n) = next("variable count")?;
            let n: usize = parse_num(n, line)?;
            let (line, vars) = next("variable ids")?;
            let vars = parse_row(vars, line, n)?;
            let (line, cards) = next("cardinalities")?;
            let cards = parse_row(cards, line, n)?;
            let (line, m) = next("entry count")?;
            let m: usize = parse_num(m, line)?;
            let mut entries = Vec::with_capacity(m);
            for _ in 0..m {
                let (line, entry) = next("entry")?;
                let mut parts = entry.split_whitespace();
                let (Some(i), Some(p), None) = (parts.next(), parts.next(), parts.next()) else {
                    return Err(EncodeError::Malformed {
                        line,
                        message: format!("expected `<index> <prob>`, got {entry:?}"),
                    });
                };
                entries.push((parse_num(i, line)?, parse_num(p, line)?));
            }
            factors.push(FactorBlock {
                vars,
                cards,
                entries,
            });
        }
        Ok(Self { factors })
    }
}

fn join(values: &[usize]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_num<T: std::str::FromStr>(s: &str, line: usize) -> EncodeResult<T> {
    s.trim().parse().map_err(|_| EncodeError::Malformed {
        line,
        message: format!("not a number: {s:?}"),
    })
}

fn parse_row(s: &str, line: usize, expected: usize) -> EncodeResult<Vec<usize>> {
    let row = s
        .split_whitespace()
        .map(|t| parse_num(t, line))
        .collect::<EncodeResult<Vec<usize>>>()?;
    if row.len() != expected {
        return Err(EncodeError::Malformed {
            line,
            message: format!("expected {expected} values, got {}", row.len()),
        });
    }
    Ok(row)
}

// ---------------------------------------------------------------------------
// List files
// ---------------------------------------------------------------------------

/// `priors.list`: one prior per line, indexed by its variable id.
pub fn prior_list(priors: &[Categorical01]) -> String {
    let mut out = String::new();
    for (i, p) in priors.iter().enumerate() {
        out.push_str(&format!("{i}\t{}", p.len()));
        for (s, w) in p.supports().iter().zip(p.probs()) {
            out.push_str(&format!("\t{s}\t{w}"));
        }
        out.push('\n');
    }
    out
}

/// `params.list`: the prior variables the updater may re-weight.
pub fn param_list(num_priors: usize) -> String {
    (0..num_priors).map(|i| format!("{i}\n")).collect()
}

pub fn observation_list(observations: &[(usize, bool)]) -> String {
    let mut out = String::new();
    for &(var, value) in observations {
        out.push_str(&format!("{var} {}\n", u8::from(value)));
    }
    out
}

pub fn query_list(vars: &[usize]) -> String {
    let mut out = String::new();
    for v in vars {
        out.push_str(&format!("{v}\n"));
    }
    out
}

/// Parse `prediction.list`: `<var> <prob>` per line.
pub fn parse_predictions(text: &str, path: &str) -> SolverResult<Vec<(usize, f64)>> {
    let mut out = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let mut parts = line.split_whitespace();
        let Some(var) = parts.next() else { continue };
        let err = |message: String| SolverError::Parse {
            path: path.to_string(),
            line: i + 1,
            message,
        };
        let var: usize = var.parse().map_err(|_| err(format!("bad variable id {var:?}")))?;
        let prob = parts
            .next()
            .ok_or_else(|| err("missing probability".into()))?;
        let prob: f64 = prob
            .parse()
            .map_err(|_| err(format!("bad probability {prob:?}")))?;
        if !(0.0..=1.0).contains(&prob) {
            return Err(err(format!("probability {prob} outside [0, 1]")));
        }
        out.push((var, prob));
    }
    Ok(out)
}

/// Parse `weights.list`: `<param> <p0> <p1> ...` per line.
pub fn parse_weights(text: &str, path: &str) -> SolverResult<Vec<(usize, Vec<f64>)>> {
    let mut out = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let mut parts = line.split_whitespace();
        let Some(param) = parts.next() else { continue };
        let err = |message: String| SolverError::Parse {
            path: path.to_string(),
            line: i + 1,
            message,
        };
        let param: usize = param
            .parse()
            .map_err(|_| err(format!("bad parameter id {param:?}")))?;
        let weights = parts
            .map(|w| w.parse::<f64>().map_err(|_| err(format!("bad weight {w:?}"))))
            .collect::<SolverResult<Vec<f64>>>()?;
        if weights.is_empty() {
            return Err(err("no weights".into()));
        }
        out.push((param, weights));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> FactorBlock {
        FactorBlock {
            vars: vec![7, 3],
            cards: vec![2, 3],
            entries: vec![(0, 0.5), (5, 0.25)],
        }
    }

    #[test]
    fn first_variable_is_least_significant() {
        let b = block();
        assert_eq!(b.table_size(), 6);
        assert_eq!(b.index_of(&[1, 0]), 1);
        assert_eq!(b.index_of(&[0, 1]), 2);
        assert_eq!(b.index_of(&[1, 2]), 5);
        assert_eq!(b.assignment(5), vec![1, 2]);
        assert_eq!(b.value(&[1, 2]), 0.25);
        assert_eq!(b.value(&[0, 2]), 0.0);
    }

    #[test]
    fn write_then_parse_gives_same_blocks() {
        let g = FactorGraph {
            factors: vec![
                block(),
                FactorBlock {
                    vars: vec![1],
                    cards: vec![2],
                    entries: vec![(1, 1.0)],
                },
            ],
        };
        let text = g.render();
        assert!(text.starts_with("2\n\n2\n7 3\n2 3\n2\n0 0.5\n5 0.25\n"));
        assert_eq!(FactorGraph::parse(&text).unwrap(), g);
    }

    #[test]
    fn truncated_file_is_malformed() {
        let err = FactorGraph::parse("1\n\n2\n7 3\n").unwrap_err();
        assert!(matches!(err, EncodeError::Malformed { .. }));
        let err = FactorGraph::parse("1\n\n2\n7\n2 2\n0\n").unwrap_err();
        assert!(matches!(err, EncodeError::Malformed { line: 4, .. }));
    }

    #[test]
    fn list_formats() {
        let priors = vec![Categorical01::uniform(&[0.25, 0.75]).unwrap()];
        assert_eq!(prior_list(&priors), "0\t2\t0.25\t0.5\t0.75\t0.5\n");
        assert_eq!(observation_list(&[(4, true), (9, false)]), "4 1\n9 0\n");
        assert_eq!(query_list(&[3, 5]), "3\n5\n");
        assert_eq!(param_list(2), "0\n1\n");
    }

    #[test]
    fn predictions_parse_and_validate() {
        let p = parse_predictions("3 0.5\n\n7 1\n", "prediction.list").unwrap();
        assert_eq!(p, vec![(3, 0.5), (7, 1.0)]);
        let err = parse_predictions("3 abc\n", "prediction.list").unwrap_err();
        assert!(matches!(err, SolverError::Parse { line: 1, .. }));
        assert!(parse_predictions("3 1.5\n", "p").is_err());
        assert!(parse_predictions("3\n", "p").is_err());
    }

    #[test]
    fn weights_parse() {
        let w = parse_weights("0 0.1 0.9\n1 1\n", "weights.list").unwrap();
        assert_eq!(w, vec![(0, vec![0.1, 0.9]), (1, vec![1.0])]);
        assert!(parse_weights("0\n", "w").is_err());
        assert!(parse_weights("x 1\n", "w").is_err());
    }
}
