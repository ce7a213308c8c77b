//! Command-line trace targets: `pkg.Func(name=stmt, name=stmt)`

use crate::domain::PlanError;

/// A function name with the argument declarations given for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub function: String,
    /// `(name, statement)` pairs in declaration order
    pub declarations: Vec<(String, String)>,
}

/// Split a target into its function name and fetch declarations.
///
/// Go method names contain parentheses themselves (`pkg.(*T).Method`), so
/// the argument list is found by walking back from the trailing `)` until
/// the nesting balance returns to zero.
///
/// # Errors
/// [`PlanError::InvalidTarget`] for unbalanced parentheses or declarations
/// that are not `name=statement`
pub fn parse_target(target: &str) -> Result<TargetSpec, PlanError> {
    let invalid = |reason: &str| PlanError::InvalidTarget {
        target: target.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = target.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty target"));
    }
    if !trimmed.ends_with(')') {
        return Ok(TargetSpec { function: trimmed.to_string(), declarations: Vec::new() });
    }

    let mut balance = 0i32;
    let mut open = None;
    for (idx, ch) in trimmed.char_indices().rev() {
        match ch {
            ')' => balance += 1,
            '(' => balance -= 1,
            _ => continue,
        }
        if balance == 0 {
            open = Some(idx);
            break;
        }
    }
    let open = open.ok_or_else(|| invalid("unbalanced parentheses"))?;

    let function = trimmed[..open].trim();
    if function.is_empty() {
        return Err(invalid("missing function name"));
    }

    let args = &trimmed[open + 1..trimmed.len() - 1];
    let declarations = args
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (name, statement) = part
                .split_once('=')
                .ok_or_else(|| invalid(&format!("expected name=statement, got {part:?}")))?;
            let (name, statement) = (name.trim(), statement.trim());
            if name.is_empty() || statement.is_empty() {
                return Err(invalid(&format!("expected name=statement, got {part:?}")));
            }
            Ok((name.to_string(), statement.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TargetSpec { function: function.to_string(), declarations })
}
