//! Parser for the line protocol printed by the tree-building executable.
//!
//! Each line reads `<ignored> <tnorm> <instance> <true class> [(<class> <degree>)]*`.
//! An instance is reported as `M` consecutive lines, one per t-norm.

use crate::ForestError;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

#[derive(Debug, Clone, PartialEq)]
pub struct Membership {
    pub class: String,
    pub degree: f64,
}

pub type Memberships = SmallVec<[Membership; 4]>;

/// One instance as classified by one tree, for every t-norm.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationRecord {
    pub id: u64,
    pub true_class: String,
    /// Indexed by t-norm index; candidates in the order the tree reported them.
    pub tnorms: Vec<Memberships>,
}

impl ClassificationRecord {
    pub fn memberships(&self, tnorm: usize) -> Option<&[Membership]> {
        self.tnorms.get(tnorm).map(|m| m.as_slice())
    }

    /// Class with the highest degree. Ties keep the first one reported.
    pub fn predicted(&self, tnorm: usize) -> Option<&str> {
        let mut best: Option<&Membership> = None;
        for candidate in self.memberships(tnorm)? {
            if best.is_none_or(|b| candidate.degree > b.degree) {
                best = Some(candidate);
            }
        }
        best.map(|m| m.class.as_str())
    }

    pub fn degree_of(&self, tnorm: usize, class: &str) -> Option<f64> {
        self.memberships(tnorm)?
            .iter()
            .find(|m| m.class == class)
            .map(|m| m.degree)
    }
}

struct ParsedLine<'a> {
    tnorm: usize,
    id: u64,
    true_class: &'a str,
    memberships: Memberships,
}

/// Parses the whole stdout of one worker run. `tnorm_count` is the number of
/// lines each instance occupies. Records come back in output order.
pub fn parse_output(shard: &str, output: &str, tnorm_count: usize) -> Result<Vec<ClassificationRecord>, ForestError> {
    if tnorm_count == 0 {
        return Err(ForestError::Configuration("at least one t-norm is required".to_string()));
    }

    let mut lines: Vec<&str> = output.lines().collect();
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }

    let error = |line_number: usize, line: &str, reason: String| ForestError::ResultParse {
        shard: shard.to_string(),
        line_number,
        line: line.to_string(),
        reason,
    };

    let mut records = Vec::with_capacity(lines.len() / tnorm_count);
    let mut seen_ids = FxHashSet::default();

    for (chunk_index, chunk) in lines.chunks(tnorm_count).enumerate() {
        let first_line_number = chunk_index * tnorm_count + 1;
        if chunk.len() < tnorm_count {
            let last = first_line_number + chunk.len() - 1;
            return Err(error(
                last,
                chunk[chunk.len() - 1],
                format!("instance has {} of {} t-norm lines", chunk.len(), tnorm_count),
            ));
        }

        let parsed = chunk
            .iter()
            .enumerate()
            .map(|(offset, &line)| parse_line(line).map_err(|reason| error(first_line_number + offset, line, reason)))
            .collect::<Result<Vec<_>, _>>()?;
        let (id, true_class) = (parsed[0].id, parsed[0].true_class);
        if !seen_ids.insert(id) {
            return Err(error(first_line_number, chunk[0], format!("instance {} reported twice", id)));
        }

        let mut tnorms: Vec<Option<Memberships>> = vec![None; tnorm_count];
        for (offset, (&line, parsed)) in chunk.iter().zip(parsed).enumerate() {
            let line_number = first_line_number + offset;
            if parsed.tnorm >= tnorm_count {
                return Err(error(
                    line_number,
                    line,
                    format!("t-norm index {} is out of range 0..{}", parsed.tnorm, tnorm_count),
                ));
            }
            if parsed.id != id {
                return Err(error(
                    line_number,
                    line,
                    format!("expected instance {} but found {}", id, parsed.id),
                ));
            }
            if parsed.true_class != true_class {
                return Err(error(
                    line_number,
                    line,
                    format!("true class changed from {} to {}", true_class, parsed.true_class),
                ));
            }
            let slot = &mut tnorms[parsed.tnorm];
            if slot.is_some() {
                return Err(error(
                    line_number,
                    line,
                    format!("t-norm {} reported twice for instance {}", parsed.tnorm, id),
                ));
            }
            *slot = Some(parsed.memberships);
        }

        // M lines, all in range and none repeated: every slot is filled.
        records.push(ClassificationRecord {
            id,
            true_class: true_class.to_string(),
            tnorms: tnorms.into_iter().map(Option::unwrap_or_default).collect(),
        });
    }

    Ok(records)
}

fn parse_line(line: &str) -> Result<ParsedLine<'_>, String> {
    let mut tokens = line.split_whitespace();
    let (Some(_), Some(tnorm), Some(id), Some(true_class)) = (tokens.next(), tokens.next(), tokens.next(), tokens.next())
    else {
        return Err("expected at least 4 fields".to_string());
    };

    let tnorm = tnorm
        .parse::<usize>()
        .map_err(|_| format!("t-norm index \"{}\" is not an integer", tnorm))?;
    let id = parse_identifier(id)?;

    let rest: Vec<&str> = tokens
        .map(|t| t.trim_matches(|c| c == '(' || c == ')'))
        .filter(|t| !t.is_empty())
        .collect();
    if rest.len() % 2 != 0 {
        return Err("a candidate class has no membership degree".to_string());
    }

    let memberships = rest
        .chunks(2)
        .map(|pair| -> Result<Membership, String> {
            let degree = pair[1]
                .parse::<f64>()
                .ok()
                .filter(|d| d.is_finite())
                .ok_or_else(|| format!("membership degree \"{}\" is not a number", pair[1]))?;
            Ok(Membership {
                class: pair[0].to_string(),
                degree,
            })
        })
        .collect::<Result<Memberships, String>>()?;

    Ok(ParsedLine {
        tnorm,
        id,
        true_class,
        memberships,
    })
}

/// Identifiers are integers, possibly printed with a zero fraction (`12.0`).
pub(crate) fn parse_identifier(token: &str) -> Result<u64, String> {
    if let Ok(id) = token.parse::<u64>() {
        return Ok(id);
    }
    match token.parse::<f64>() {
        Ok(value) if value >= 0.0 && value.fract() == 0.0 && value <= u64::MAX as f64 => Ok(value as u64),
        _ => Err(format!("instance identifier \"{}\" is not an integer", token)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_TNORMS_THREE_INSTANCES: &str = "\
x 0 1 A A 0.8 B 0.2
x 1 1 A A 0.6 B 0.4
x 0 2 B A 0.3 B 0.7
x 1 2 B A 0.5 B 0.5
x 0 3 A B 0.9
x 1 3 A A 0.1 B 0.9";

    #[test]
    fn test_parses_grouped_output() {
        let records = parse_output("001", TWO_TNORMS_THREE_INSTANCES, 2).unwrap();
        assert_eq!(records.len(), 3);
        for record in &records {
            assert_eq!(record.tnorms.len(), 2);
        }
        assert_eq!(records[0].id, 1);
        assert_eq!(records[1].true_class, "B");
        assert_eq!(records[0].degree_of(1, "B"), Some(0.4));
        assert_eq!(records[2].degree_of(0, "A"), None);
    }

    #[test]
    fn test_trailing_blank_line_is_ignored() {
        let with_blank = format!("{}\n", TWO_TNORMS_THREE_INSTANCES);
        let with_blank_lines = format!("{}\n\n  \n", TWO_TNORMS_THREE_INSTANCES);
        let plain = parse_output("001", TWO_TNORMS_THREE_INSTANCES, 2).unwrap();
        assert_eq!(parse_output("001", &with_blank, 2).unwrap(), plain);
        assert_eq!(parse_output("001", &with_blank_lines, 2).unwrap(), plain);
    }

    #[test]
    fn test_parenthesized_candidates() {
        let records = parse_output("001", "x 0 4 A (A 0.25) (B 0.75)\n", 1).unwrap();
        assert_eq!(records[0].predicted(0), Some("B"));
    }

    #[test]
    fn test_predicted_tie_keeps_first() {
        let records = parse_output("001", TWO_TNORMS_THREE_INSTANCES, 2).unwrap();
        assert_eq!(records[1].predicted(1), Some("A"));
        assert_eq!(records[1].predicted(0), Some("B"));
    }

    #[test]
    fn test_interleaved_instances_are_rejected() {
        let output = "x 0 1 A A 1.0\nx 0 2 A A 1.0\nx 1 1 A A 1.0\nx 1 2 A A 1.0\n";
        let err = parse_output("003", output, 2).unwrap_err();
        match err {
            ForestError::ResultParse { shard, line_number, .. } => {
                assert_eq!(shard, "003");
                assert_eq!(line_number, 2);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_incomplete_group_is_rejected() {
        let output = "x 0 1 A A 1.0\nx 1 1 A A 1.0\nx 0 2 A A 1.0\n";
        assert!(matches!(
            parse_output("001", output, 2),
            Err(ForestError::ResultParse { line_number: 3, .. })
        ));
    }

    #[test]
    fn test_duplicate_tnorm_is_rejected() {
        let output = "x 0 1 A A 1.0\nx 0 1 A A 1.0\n";
        assert!(parse_output("001", output, 2).is_err());
        let empty_then_duplicate = "x 0 1 A\nx 0 1 A\n";
        assert!(parse_output("001", empty_then_duplicate, 2).is_err());
    }

    #[test]
    fn test_duplicate_instance_is_rejected() {
        let output = "x 0 1 A A 1.0\nx 0 1 A A 1.0\n";
        assert!(parse_output("001", output, 1).is_err());
    }

    #[test]
    fn test_malformed_lines() {
        assert!(parse_output("001", "x 0 1\n", 1).is_err());
        assert!(parse_output("001", "x zero 1 A A 1.0\n", 1).is_err());
        assert!(parse_output("001", "x 0 one A A 1.0\n", 1).is_err());
        assert!(parse_output("001", "x 0 1 A A\n", 1).is_err());
        assert!(parse_output("001", "x 0 1 A A high\n", 1).is_err());
        assert!(parse_output("001", "x 3 1 A A 1.0\n", 2).is_err());
        assert!(parse_output("001", "x 0 1 A A 1.0\n\nx 0 2 A A 1.0\n", 1).is_err());
    }

    #[test]
    fn test_float_identifiers() {
        let records = parse_output("001", "x 0 12.0 A A 1.0\n", 1).unwrap();
        assert_eq!(records[0].id, 12);
        assert!(parse_output("001", "x 0 12.5 A A 1.0\n", 1).is_err());
    }

    #[test]
    fn test_empty_output() {
        assert!(parse_output("001", "", 2).unwrap().is_empty());
        assert!(parse_output("001", "\n", 2).unwrap().is_empty());
    }
}
