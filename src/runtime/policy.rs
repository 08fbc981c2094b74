//! The mock-policy oracle: decides, per `(requesting file, specifier)`
//! pair, whether the delivered module must be a mock.

use super::normalize::{virtual_mock_path, ModuleKind, PATH_LIST_SEPARATOR};
use super::{has_node_modules_segment, Runtime};
use crate::error::Result;
use log::trace;
use std::path::Path;

impl Runtime {
    /// Decision procedure; the first applicable rule wins:
    ///
    /// 1. virtual-mock candidate registered -> mock
    /// 2. explicit force-mock/force-real mark -> as marked
    /// 3. automock off, core module, or transitive-dependency
    ///    breadcrumb -> real
    /// 4. memoised decision -> as memoised
    /// 5. unresolvable, but a manual mock exists -> mock
    /// 6. unmock-list matches the resolved path -> real
    /// 7. the requesting module's subtree is automock-exempt, or a flat
    ///    node_modules install reached from an unmocked package -> real,
    ///    extending the exemption to this module
    /// 8. otherwise -> mock
    pub fn should_mock(&self, from: &Path, specifier: &str) -> Result<bool> {
        let candidate = virtual_mock_path(from, specifier);
        if self.inner.virtual_mocks.borrow().contains(&candidate) {
            return Ok(true);
        }

        let id = self.normalize_id(from, Some(specifier))?;
        let key = id.key();
        if let Some(explicit) = self.inner.explicit_mocks.borrow().get(&key) {
            return Ok(*explicit);
        }

        let breadcrumb_key = format!("{}{}{}", from.display(), PATH_LIST_SEPARATOR, key);
        if !self.inner.automock.get()
            || id.kind == ModuleKind::Core
            || self
                .inner
                .transitive_dep_cache
                .borrow()
                .get(&breadcrumb_key)
                .copied()
                .unwrap_or(false)
        {
            return Ok(false);
        }

        if let Some(memoised) = self.inner.should_mock_cache.borrow().get(&key) {
            return Ok(*memoised);
        }

        let module_path = match self.inner.resolver.resolve_module(from, specifier) {
            Ok(path) => path,
            Err(e) => {
                // The mock renders the resolution failure irrelevant.
                if self.inner.resolver.get_mock_module(specifier).is_some() {
                    self.inner.should_mock_cache.borrow_mut().insert(key, true);
                    return Ok(true);
                }
                return Err(e);
            }
        };

        if let Some(unmock) = &self.inner.unmock_regex {
            if unmock.is_match(&module_path.to_string_lossy()) {
                self.inner.should_mock_cache.borrow_mut().insert(key, false);
                return Ok(false);
            }
        }

        // Flat-layout package managers install transitive dependencies
        // next to their parents: once a top-level package is unmocked,
        // siblings reached through node_modules follow it.
        let current_key = self.normalize_id(from, None)?.key();
        let subtree_exempt =
            self.inner.transitive_unmock.borrow().get(&current_key) == Some(&false);
        let flat_install =
            has_node_modules_segment(from) && has_node_modules_segment(&module_path);
        let from_unmocked = self
            .inner
            .unmock_regex
            .as_ref()
            .map_or(false, |re| re.is_match(&from.to_string_lossy()));
        let from_forced_real =
            self.inner.explicit_mocks.borrow().get(&current_key) == Some(&false);

        if subtree_exempt || (flat_install && (from_unmocked || from_forced_real)) {
            trace!(
                "transitive unmock: '{}' via {}",
                specifier,
                from.display()
            );
            self.inner
                .transitive_unmock
                .borrow_mut()
                .insert(key.clone(), false);
            self.inner
                .transitive_dep_cache
                .borrow_mut()
                .insert(breadcrumb_key, true);
            self.inner.should_mock_cache.borrow_mut().insert(key, false);
            return Ok(false);
        }

        self.inner.should_mock_cache.borrow_mut().insert(key, true);
        Ok(true)
    }
}
