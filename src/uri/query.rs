use std::fmt::Display;

use itertools::Itertools;

/// Percent-decodes a query component. `+` stands for a space. Input that does not decode to
/// UTF-8 is returned unchanged.
#[must_use]
pub fn decode_component(raw: &str) -> String {
  let spaced = raw.replace('+', " ");
  urlencoding::decode(&spaced).map_or_else(
    |e| {
      log::debug!("Keeping undecodable component {raw:?}: {e}");
      raw.to_owned()
    },
    std::borrow::Cow::into_owned,
  )
}

#[must_use]
pub fn encode_component(value: &str) -> String {
  urlencoding::encode(value).into_owned()
}

/// A URL taken apart into everything before the query, the query parameters and the
/// fragment. Parameters are kept in order and in their raw, still encoded form, so
/// parameters this crate does not know survive untouched. A parameter without `=` has no
/// value, which is different from an empty one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SplitUrl {
  pub base: String,
  params: Vec<(String, Option<String>)>,
  pub fragment: Option<String>,
}

impl SplitUrl {
  #[must_use]
  pub fn parse(url: &str) -> Self {
    let (rest, fragment) = match url.split_once('#') {
      Some((rest, fragment)) => (rest, Some(fragment.to_owned())),
      None => (url, None),
    };
    let (base, query) = rest.split_once('?').unwrap_or((rest, ""));
    let params = query
      .split('&')
      .filter(|p| !p.is_empty())
      .map(|p| match p.split_once('=') {
        Some((key, value)) => (key.to_owned(), Some(value.to_owned())),
        None => (p.to_owned(), None),
      })
      .collect();

    Self {
      base: base.to_owned(),
      params,
      fragment,
    }
  }

  /// The raw value of the first parameter named `key`. A bare key reads as empty.
  #[must_use]
  pub fn raw(&self, key: &str) -> Option<&str> {
    self
      .params
      .iter()
      .find(|(k, _)| k == key)
      .map(|(_, v)| v.as_deref().unwrap_or_default())
  }

  /// The decoded value of the first parameter named `key`.
  #[must_use]
  pub fn get(&self, key: &str) -> Option<String> {
    self.raw(key).map(decode_component)
  }

  pub fn remove(&mut self, key: &str) {
    self.params.retain(|(k, _)| k != key);
  }

  /// Sets `key` to an already encoded value, replacing the first occurrence in place and
  /// dropping any further ones.
  pub fn set_raw(&mut self, key: &str, raw: String) {
    match self.params.iter().position(|(k, _)| k == key) {
      Some(pos) => {
        self.params[pos].1 = Some(raw);
        let mut seen = 0;
        self.params.retain(|(k, _)| {
          if k != key {
            return true;
          }
          seen += 1;
          seen == 1
        });
      }
      None => self.params.push((key.to_owned(), Some(raw))),
    }
  }

  pub fn set(&mut self, key: &str, value: &str) {
    self.set_raw(key, encode_component(value));
  }
}

impl Display for SplitUrl {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.base)?;
    if !self.params.is_empty() {
      let query = self
        .params
        .iter()
        .map(|(k, v)| match v {
          Some(v) => format!("{k}={v}"),
          None => k.clone(),
        })
        .join("&");
      write!(f, "?{query}")?;
    }
    if let Some(fragment) = &self.fragment {
      write!(f, "#{fragment}")?;
    }
    Ok(())
  }
}
