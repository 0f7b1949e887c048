/// Deterministic generator for synthesized identifiers.
///
/// Temporaries are `$$t0`, `$$t1`, ... and per-call trace-id variables are
/// `$$ft0`, `$$ft1`, ... drawn from the same counter. If the source already
/// contains the prefix, the prefix is lengthened until it does not, so
/// generated names can never shadow program names.
#[derive(Debug, Clone)]
pub struct NameGenerator {
    prefix: String,
    counter: usize,
}

impl NameGenerator {
    pub fn for_source(source: &str) -> Self {
        let mut prefix = String::from("$$");
        while source.contains(prefix.as_str()) {
            prefix.push('$');
        }
        Self { prefix, counter: 0 }
    }

    pub fn temporary(&mut self) -> String {
        self.next("t")
    }

    pub fn trace_id(&mut self) -> String {
        self.next("ft")
    }

    fn next(&mut self, stem: &str) -> String {
        let name = format!("{}{}{}", self.prefix, stem, self.counter);
        self.counter += 1;
        name
    }
}
