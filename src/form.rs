use url::form_urlencoded::Serializer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormValue {
    Text(String),
    List(Vec<String>),
}

/// An `application/x-www-form-urlencoded` body.
///
/// Keys keep the order they were first set in; setting a key again replaces its
/// value in place. Lists are written bracket style, `key[]=a&key[]=b`, which is
/// the only array encoding the portal understands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Form {
    fields: Vec<(String, FormValue)>,
}

impl Form {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(self, key: &str, value: impl ToString) -> Self {
        self.set(key, FormValue::Text(value.to_string()))
    }

    pub fn list<I>(self, key: &str, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        let values = values.into_iter().map(|v| v.to_string()).collect();
        self.set(key, FormValue::List(values))
    }

    /// Copies every field of `other` over this form.
    pub fn merge(mut self, other: Form) -> Self {
        for (key, value) in other.fields {
            self = self.set(&key, value);
        }
        self
    }

    fn set(mut self, key: &str, value: FormValue) -> Self {
        match self.fields.iter_mut().find(|(k, _)| k == key) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((key.to_string(), value)),
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&FormValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Scalar value of `key`, if it was set as text.
    pub fn value(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(FormValue::Text(text)) => Some(text),
            _ => None,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn encode(&self) -> String {
        let mut serializer = Serializer::new(String::new());
        for (key, value) in &self.fields {
            match value {
                FormValue::Text(text) => {
                    serializer.append_pair(key, text);
                }
                FormValue::List(items) => {
                    let key = format!("{key}[]");
                    for item in items {
                        serializer.append_pair(&key, item);
                    }
                }
            }
        }
        serializer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_insertion_order_and_empty_values() {
        let form = Form::new()
            .text("issacweb_data", "")
            .text("id", "20161234")
            .text("ssid", 30);
        assert_eq!(form.encode(), "issacweb_data=&id=20161234&ssid=30");
    }

    #[test]
    fn lists_use_brackets() {
        let form = Form::new().list("weeks", [1, 2]).text("method", "auth");
        assert_eq!(form.encode(), "weeks%5B%5D=1&weeks%5B%5D=2&method=auth");
    }

    #[test]
    fn overriding_a_key_keeps_its_position() {
        let base = Form::new().text("secureToken", "t").text("isToken", "N");
        let form = base.merge(Form::new().text("isToken", "Y").text("reTry", "N"));
        assert_eq!(form.keys().collect::<Vec<_>>(), ["secureToken", "isToken", "reTry"]);
        assert_eq!(form.value("isToken"), Some("Y"));
    }

    #[test]
    fn escapes_reserved_characters() {
        let form = Form::new().text("pw", "a&b=c%");
        assert_eq!(form.encode(), "pw=a%26b%3Dc%25");
    }
}
