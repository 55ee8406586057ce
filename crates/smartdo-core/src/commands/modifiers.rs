use anyhow::anyhow;
use chrono::{
  DateTime,
  Utc
};
use tracing::{
  instrument,
  trace
};

use crate::datetime::parse_date_expr;
use crate::task::Priority;
use crate::validate::TaskForm;
use crate::view::{
  CategoryFilter,
  SortMode
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Mod {
  Due(Option<DateTime<Utc>>),
  Priority(Priority),
  Category(CategoryFilter),
  Description(String),
  Sort(SortMode),
  Search(String),
  Archive(bool),
  FullName(String),
  Username(String)
}

/// Free words and `key:value`
/// modifiers split out of a command's
/// arguments. Everything after `--` is
/// a word.
#[derive(Debug, Clone, Default)]
pub(crate) struct ParsedArgs {
  pub words: Vec<String>,
  pub mods:  Vec<Mod>
}

impl ParsedArgs {
  pub fn text(&self) -> String {
    self.words.join(" ")
  }

  pub fn sort(&self) -> Option<SortMode> {
    self.mods.iter().rev().find_map(
      |m| match m {
        | Mod::Sort(mode) => Some(*mode),
        | _ => None
      }
    )
  }

  pub fn search(&self) -> Option<&str> {
    self.mods.iter().rev().find_map(
      |m| match m {
        | Mod::Search(text) => {
          Some(text.as_str())
        }
        | _ => None
      }
    )
  }

  pub fn category(
    &self
  ) -> Option<CategoryFilter> {
    self.mods.iter().rev().find_map(
      |m| match m {
        | Mod::Category(filter) => {
          Some(filter.clone())
        }
        | _ => None
      }
    )
  }

  pub fn archive(&self) -> Option<bool> {
    self.mods.iter().rev().find_map(
      |m| match m {
        | Mod::Archive(yes) => Some(*yes),
        | _ => None
      }
    )
  }

  pub fn full_name(
    &self
  ) -> Option<&str> {
    self.mods.iter().rev().find_map(
      |m| match m {
        | Mod::FullName(name) => {
          Some(name.as_str())
        }
        | _ => None
      }
    )
  }

  pub fn username(
    &self
  ) -> Option<&str> {
    self.mods.iter().rev().find_map(
      |m| match m {
        | Mod::Username(name) => {
          Some(name.as_str())
        }
        | _ => None
      }
    )
  }

  /// Writes the task-field modifiers
  /// into `form`. View-only modifiers
  /// are ignored here.
  pub fn apply_to_form(
    &self,
    form: &mut TaskForm
  ) -> anyhow::Result<()> {
    for one_mod in &self.mods {
      match one_mod {
        | Mod::Due(due) => {
          form.due_date = *due
        }
        | Mod::Priority(priority) => {
          form.priority = priority.clone()
        }
        | Mod::Category(
          CategoryFilter::Only(category)
        ) => form.category = category.clone(),
        | Mod::Category(
          CategoryFilter::All
        ) => {
          return Err(anyhow!(
            "category:all only applies \
             to listings"
          ));
        }
        | Mod::Description(text) => {
          form.description = text.clone()
        }
        | Mod::Sort(_)
        | Mod::Search(_)
        | Mod::Archive(_)
        | Mod::FullName(_)
        | Mod::Username(_) => {}
      }
    }
    Ok(())
  }
}

#[instrument(skip(args, now))]
pub(crate) fn parse_args(
  args: &[String],
  now: DateTime<Utc>
) -> anyhow::Result<ParsedArgs> {
  let mut parsed = ParsedArgs::default();

  let mut literal = false;
  for arg in args {
    if arg == "--" && !literal {
      literal = true;
      continue;
    }

    if !literal
      && let Some(one_mod) =
        parse_one_mod(arg, now)?
    {
      trace!(?one_mod, "parsed modifier");
      parsed.mods.push(one_mod);
      continue;
    }

    parsed.words.push(arg.clone());
  }

  Ok(parsed)
}

fn parse_one_mod(
  tok: &str,
  now: DateTime<Utc>
) -> anyhow::Result<Option<Mod>> {
  let Some((key, value)) =
    tok.split_once(':')
  else {
    return Ok(None);
  };

  let key = key.to_ascii_lowercase();
  let one_mod = match key.as_str() {
    | "due" => {
      let trimmed = value.trim();
      if trimmed.is_empty()
        || trimmed
          .eq_ignore_ascii_case("none")
      {
        Mod::Due(None)
      } else {
        Mod::Due(Some(parse_date_expr(
          trimmed, now
        )?))
      }
    }
    | "pri" | "priority" => {
      Mod::Priority(value.parse()?)
    }
    | "cat" | "category" => {
      Mod::Category(value.parse()?)
    }
    | "desc" | "description" => {
      Mod::Description(
        value.trim().to_string()
      )
    }
    | "sort" => Mod::Sort(value.parse()?),
    | "search" => {
      Mod::Search(value.to_string())
    }
    | "archive" => {
      Mod::Archive(parse_yes_no(
        value,
      )?)
    }
    | "name" => {
      Mod::FullName(
        value.trim().to_string()
      )
    }
    | "user" | "username" => {
      Mod::Username(
        value.trim().to_string()
      )
    }
    | _ => return Ok(None)
  };

  Ok(Some(one_mod))
}

fn parse_yes_no(
  value: &str
) -> anyhow::Result<bool> {
  match value
    .trim()
    .to_ascii_lowercase()
    .as_str()
  {
    | "y" | "yes" | "on" | "true" => {
      Ok(true)
    }
    | "n" | "no" | "off" | "false" => {
      Ok(false)
    }
    | other => {
      Err(anyhow!(
        "expected yes or no, got: \
         {other}"
      ))
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    TimeZone,
    Utc
  };

  use super::{
    Mod,
    parse_args
  };
  use crate::task::{
    Category,
    Priority
  };
  use crate::validate::TaskForm;
  use crate::view::{
    CategoryFilter,
    SortMode
  };

  fn strings(
    args: &[&str]
  ) -> Vec<String> {
    args
      .iter()
      .map(|s| s.to_string())
      .collect()
  }

  #[test]
  fn words_and_modifiers_separate() {
    let now = Utc
      .with_ymd_and_hms(
        2026, 1, 10, 9, 0, 0
      )
      .single()
      .expect("date");
    let parsed = parse_args(
      &strings(&[
        "Buy",
        "pri:high",
        "groceries",
        "cat:shopping",
        "due:2026-01-12",
        "Note:",
        "--",
        "sort:due"
      ]),
      now
    )
    .expect("parse");

    assert_eq!(
      parsed.text(),
      "Buy groceries Note: sort:due"
    );
    assert!(parsed.sort().is_none());

    let mut form = TaskForm {
      title: parsed.text(),
      ..TaskForm::default()
    };
    parsed
      .apply_to_form(&mut form)
      .expect("apply");
    assert_eq!(
      form.priority,
      Priority::High
    );
    assert_eq!(
      form.category,
      Category::Shopping
    );
    assert!(form.due_date.is_some());
  }

  #[test]
  fn view_modifiers_and_bad_values() {
    let now = Utc::now();
    let parsed = parse_args(
      &strings(&[
        "sort:priority",
        "search:groc",
        "cat:all",
        "archive:no",
        "due:none"
      ]),
      now
    )
    .expect("parse");
    assert_eq!(
      parsed.sort(),
      Some(SortMode::Priority)
    );
    assert_eq!(
      parsed.search(),
      Some("groc")
    );
    assert_eq!(
      parsed.category(),
      Some(CategoryFilter::All)
    );
    assert_eq!(
      parsed.archive(),
      Some(false)
    );
    assert!(
      parsed
        .mods
        .contains(&Mod::Due(None))
    );

    let mut form = TaskForm::default();
    assert!(
      parsed
        .apply_to_form(&mut form)
        .is_err()
    );

    assert!(
      parse_args(
        &strings(&["pri:urgent"]),
        now
      )
      .is_err()
    );
    assert!(
      parse_args(
        &strings(&["cat:errands"]),
        now
      )
      .is_err()
    );
  }
}
