//! Visibility and authorship rules shared by news and documents.

use portal_storage::{OrganizationId, Team, TeamId, TeamVisibility, UserId};

use crate::{ActorContext, Denial};

/// The slice of an organization's content the viewer may list.
///
/// `None` means the viewer has no organization and sees nothing.
pub fn visibility(actor: &ActorContext) -> Option<(OrganizationId, TeamVisibility)> {
    let org = actor.organization.get()?;
    let rule = if actor.is_admin() {
        TeamVisibility::Everything
    } else {
        TeamVisibility::OrganizationWideAnd(actor.team.get())
    };
    Some((org, rule))
}

/// Whether the viewer may open a single item.
pub fn authorize_view(
    actor: &ActorContext,
    organization_id: &OrganizationId,
    team_id: Option<TeamId>,
) -> Result<(), Denial> {
    actor.in_organization(organization_id)?;
    match visibility(actor) {
        Some((_, rule)) if rule.admits(team_id) => Ok(()),
        _ => Err(Denial::forbidden("this item belongs to another team")),
    }
}

/// Whether the actor may publish to `team`, or organization-wide when `None`.
///
/// Organization-wide items need `Admin`. Team items need `Admin` or the
/// team's leader; the team must belong to the actor's organization.
pub fn authorize_publish(actor: &ActorContext, team: Option<&Team>) -> Result<(), Denial> {
    actor.organization()?;
    match team {
        None if actor.is_admin() => Ok(()),
        None => Err(Denial::forbidden(
            "organization-wide publishing requires admin",
        )),
        Some(team) => {
            actor.in_organization(&team.organization_id)?;
            if actor.is_admin() || actor.leads(team) {
                Ok(())
            } else {
                Err(Denial::forbidden(
                    "only the team leader or an admin may publish to this team",
                ))
            }
        }
    }
}

/// Edit or delete: the original author, or an admin of the same organization.
pub fn authorize_modify(
    actor: &ActorContext,
    organization_id: &OrganizationId,
    author_id: &UserId,
) -> Result<(), Denial> {
    actor.in_organization(organization_id)?;
    if actor.id == *author_id || actor.is_admin() {
        Ok(())
    } else {
        Err(Denial::forbidden("only the author or an admin may change this"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{team, user};
    use portal_storage::Role;

    #[test]
    fn test_unaffiliated_sees_nothing() {
        let loner = user(Role::User, None, None);
        assert_eq!(visibility(&ActorContext::from(&loner)), None);
    }

    #[test]
    fn test_admin_sees_everything() {
        let org = OrganizationId::new();
        let admin = user(Role::Admin, Some(org), None);
        assert_eq!(
            visibility(&ActorContext::from(&admin)),
            Some((org, TeamVisibility::Everything))
        );
    }

    #[test]
    fn test_member_sees_org_wide_and_own_team() {
        let org = OrganizationId::new();
        let own = TeamId::new();
        let member = user(Role::Employee, Some(org), Some(own));
        let actor = ActorContext::from(&member);

        assert_eq!(
            visibility(&actor),
            Some((org, TeamVisibility::OrganizationWideAnd(Some(own))))
        );
        assert_eq!(authorize_view(&actor, &org, None), Ok(()));
        assert_eq!(authorize_view(&actor, &org, Some(own)), Ok(()));
        assert!(matches!(
            authorize_view(&actor, &org, Some(TeamId::new())),
            Err(Denial::Forbidden(_))
        ));
        assert_eq!(
            authorize_view(&actor, &OrganizationId::new(), None),
            Err(Denial::OutOfScope)
        );
    }

    #[test]
    fn test_publish_rules() {
        let org = OrganizationId::new();
        let leader = user(Role::Manager, Some(org), None);
        let led = team(org, Some(leader.id));
        let other = team(org, None);
        let foreign = team(OrganizationId::new(), None);
        let admin = user(Role::Admin, Some(org), None);

        let leader = ActorContext::from(&leader);
        let admin = ActorContext::from(&admin);

        assert_eq!(authorize_publish(&leader, Some(&led)), Ok(()));
        assert!(authorize_publish(&leader, Some(&other)).is_err());
        assert!(authorize_publish(&leader, None).is_err());
        assert_eq!(authorize_publish(&admin, None), Ok(()));
        assert_eq!(authorize_publish(&admin, Some(&other)), Ok(()));
        assert_eq!(
            authorize_publish(&admin, Some(&foreign)),
            Err(Denial::OutOfScope)
        );
    }

    #[test]
    fn test_modify_rules() {
        let org = OrganizationId::new();
        let author = user(Role::Employee, Some(org), None);
        let peer = user(Role::Manager, Some(org), None);
        let admin = user(Role::Admin, Some(org), None);

        let a = ActorContext::from(&author);
        assert_eq!(authorize_modify(&a, &org, &author.id), Ok(()));
        assert!(authorize_modify(&ActorContext::from(&peer), &org, &author.id).is_err());
        assert_eq!(
            authorize_modify(&ActorContext::from(&admin), &org, &author.id),
            Ok(())
        );
    }
}
