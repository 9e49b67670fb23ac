//! Tenant resolution from a subject identifier of the form `user@tenant`.

/// Default domain of the super tenant.
pub const SUPER_TENANT_DOMAIN: &str = "carbon.super";

/// Tenant domain for a subject: the text after the last `@`, or the super
/// tenant when there is none.
pub fn tenant_domain_of<'a>(subject: &'a str, super_tenant: &'a str) -> &'a str {
    match subject.rsplit_once('@') {
        Some((user, domain)) if !user.is_empty() && !domain.is_empty() => domain,
        _ => super_tenant,
    }
}

/// Username with the `@tenant` suffix removed.
pub fn tenant_aware_username(subject: &str) -> &str {
    match subject.rsplit_once('@') {
        Some((user, domain)) if !user.is_empty() && !domain.is_empty() => user,
        _ => subject,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_username_is_super_tenant() {
        assert_eq!(tenant_domain_of("alice", SUPER_TENANT_DOMAIN), "carbon.super");
        assert_eq!(tenant_aware_username("alice"), "alice");
    }

    #[test]
    fn test_tenant_suffix() {
        assert_eq!(tenant_domain_of("bob@acme.com", SUPER_TENANT_DOMAIN), "acme.com");
        assert_eq!(tenant_aware_username("bob@acme.com"), "bob");
    }

    #[test]
    fn test_email_username_in_tenant() {
        assert_eq!(
            tenant_domain_of("bob@mail.com@acme.com", SUPER_TENANT_DOMAIN),
            "acme.com"
        );
        assert_eq!(tenant_aware_username("bob@mail.com@acme.com"), "bob@mail.com");
    }

    #[test]
    fn test_degenerate_at_signs() {
        assert_eq!(tenant_domain_of("bob@", SUPER_TENANT_DOMAIN), "carbon.super");
        assert_eq!(tenant_aware_username("bob@"), "bob@");
        assert_eq!(tenant_domain_of("@acme.com", SUPER_TENANT_DOMAIN), "carbon.super");
    }
}
