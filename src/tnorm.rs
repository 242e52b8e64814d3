/// Display name of the aggregation method reported under `index`.
pub fn tnorm_name(index: usize) -> String {
    match index {
        0 => "zadeh".to_string(),
        1 => "lukasiewicz".to_string(),
        2 => "probabilistic".to_string(),
        3 => "weber".to_string(),
        n => format!("tnorm{}", n),
    }
}

/// Names of every method run for a configured `tnorms` value (indices `0..=tnorms`).
pub fn tnorm_names(tnorms: usize) -> Vec<String> {
    (0..=tnorms).map(tnorm_name).collect()
}
