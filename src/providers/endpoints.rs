use url::Url;

fn build_provider_url(base: &Url, path: &str, query: Option<&str>) -> Url {
    let mut url = base.clone();
    url.set_path(path);
    url.set_query(query);
    url
}

/// One upstream base URL with its three resolved operation URLs.
#[derive(Debug, Clone)]
pub struct Endpoint {
    generate: Url,
    stream: Url,
    models: Url,
}

impl Endpoint {
    pub fn select(&self, stream: bool) -> &Url {
        if stream { &self.stream } else { &self.generate }
    }

    pub fn models(&self) -> &Url {
        &self.models
    }
}

/// Ordered failover list of interchangeable upstream bases. Index 0 is the
/// preferred endpoint; the dispatch engine walks forward on 403/429/503.
#[derive(Debug, Clone)]
pub struct EndpointTable {
    entries: Vec<Endpoint>,
}

impl EndpointTable {
    pub fn new(
        bases: &[Url],
        generate_path: &str,
        stream_path: &str,
        stream_query: Option<&str>,
        models_path: &str,
    ) -> Self {
        let entries = bases
            .iter()
            .map(|base| Endpoint {
                generate: build_provider_url(base, generate_path, None),
                stream: build_provider_url(base, stream_path, stream_query),
                models: build_provider_url(base, models_path, None),
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Endpoint> {
        self.entries.get(index)
    }

    /// Preferred endpoint, used for calls outside the failover walk
    /// (models-list refresh, project onboarding).
    pub fn primary(&self) -> &Endpoint {
        &self.entries[0]
    }
}
