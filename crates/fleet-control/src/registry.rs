use std::sync::Arc;

use fleet_types::ServiceDescriptor;

/// Fixed list of services known to the supervisor. Membership never changes after startup.
#[derive(Debug, Clone)]
pub struct Registry {
    services: Arc<[ServiceDescriptor]>,
}

impl Registry {
    pub fn new(services: Vec<ServiceDescriptor>) -> Self {
        Self {
            services: services.into(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.services.iter()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn descriptors(&self) -> Vec<ServiceDescriptor> {
        self.services.to_vec()
    }
}
