//! Graphviz rendering of a topology

use crate::topology::registry::Registry;
use crate::topology::service::ServiceKind;
use std::fmt::{Display, Formatter};

const FONT: &str = "Helvetica,Arial,sans-serif";
const DEFAULT_FILL: &str = "gainsboro";

/// See https://graphviz.org/doc/info/colors.html
pub fn fill_color(kind: ServiceKind) -> &'static str {
    match kind {
        ServiceKind::Client => "bisque",
        ServiceKind::TrafficGenerator => "tan",
        ServiceKind::Dhcp => "aquamarine",
        ServiceKind::Dns => "paleturquoise",
        ServiceKind::Http => "lightskyblue",
        ServiceKind::Router => "palegreen",
        ServiceKind::LoadBalancer => "plum",
        ServiceKind::Tor => "coral",
    }
}

/// A topology rendered as an undirected graph, with services and interfaces as nodes
pub struct Graph<'a> {
    registry: &'a Registry,
    /// Fill service nodes by kind
    color: bool,
    /// Label services with their addresses and draw interfaces as boxes
    extra: bool,
}

impl<'a> Graph<'a> {
    pub fn new(registry: &'a Registry, color: bool, extra: bool) -> Self {
        Self {
            registry,
            color,
            extra,
        }
    }
}

impl Display for Graph<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "strict graph Network_Configuration {{")?;
        writeln!(f, "\tfontname=\"{FONT}\"")?;
        writeln!(f, "\tnode [ fontname=\"{FONT}\" ]")?;
        writeln!(f, "\tedge [ fontname=\"{FONT}\" ]")?;
        writeln!(f, "\tlabel=\"Network Configuration\"")?;
        writeln!(f, "\tlabelloc=\"t\"")?;
        writeln!(f, "\tgraph [ splines=line overlap=scale dpi=150 ]")?;
        writeln!(f)?;

        for service in self.registry.services() {
            let fill = if self.color {
                fill_color(service.kind())
            } else {
                DEFAULT_FILL
            };

            write!(f, "\t\"{}\" [ ", service.name())?;
            if self.extra {
                write!(f, "label=\"{}", service.name())?;
                for binding in service.bindings() {
                    match binding.address() {
                        Some(address) => write!(f, "\\n{address}")?,
                        None => write!(f, "\\ndhcp")?,
                    }
                }
                write!(f, "\" ")?;
            }
            writeln!(f, "style=\"filled\" fillcolor=\"{fill}\" ]")?;
        }

        writeln!(f)?;
        for iface in self.registry.interfaces() {
            if self.extra {
                match iface.cidr() {
                    Some(cidr) => writeln!(
                        f,
                        "\t\"{}\" [ label=\"{}\\n{cidr}\" shape=box ]",
                        iface.name(),
                        iface.name()
                    )?,
                    None => writeln!(f, "\t\"{}\" [ shape=box ]", iface.name())?,
                }
            } else {
                writeln!(
                    f,
                    "\t\"{}\" [ label=\"\" shape=none height=0 width=0 ]",
                    iface.name()
                )?;
            }
        }

        writeln!(f)?;
        for service in self.registry.services() {
            for binding in service.bindings() {
                writeln!(f, "\t\"{}\" -- \"{}\" [ ]", service.name(), binding.iface())?;
            }
        }

        writeln!(f, "}}")
    }
}

/// Renders the topology in the Graphviz DOT language
pub fn render(registry: &Registry, color: bool, extra: bool) -> String {
    Graph::new(registry, color, extra).to_string()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::topology::Topology;
    use crate::topology::binding::BindingOptions;
    use crate::topology::service::{Router, ServiceOptions};
    use std::net::Ipv4Addr;

    fn topology() -> Topology {
        let mut topology = Topology::new();
        let lan = topology.new_iface(Some("192.168.0.0/24".parse().unwrap()));
        let wan = topology.new_iface(None);
        let router = topology
            .router(ServiceOptions::default(), Router::default())
            .unwrap();
        let client = topology.client(ServiceOptions::default()).unwrap();

        let address = BindingOptions::builder()
            .address(Ipv4Addr::new(192, 168, 0, 1))
            .build();
        topology.add_iface(router, lan, address).unwrap();
        topology
            .add_iface(router, wan, BindingOptions::default())
            .unwrap();
        topology
            .add_iface(client, lan, BindingOptions::default())
            .unwrap();
        topology
    }

    #[test]
    fn test_render_plain() {
        let topology = topology();
        let dot = render(topology.registry(), true, false);

        assert!(dot.starts_with("strict graph Network_Configuration {\n"));
        assert!(dot.ends_with("}\n"));
        assert!(dot.contains("\t\"router-0\" [ style=\"filled\" fillcolor=\"palegreen\" ]\n"));
        assert!(dot.contains("\t\"client-0\" [ style=\"filled\" fillcolor=\"bisque\" ]\n"));
        assert!(dot.contains("\t\"network-1\" [ label=\"\" shape=none height=0 width=0 ]\n"));

        let edges: Vec<_> = dot.lines().filter(|line| line.contains(" -- ")).collect();
        assert_eq!(
            edges,
            [
                "\t\"client-0\" -- \"network-0\" [ ]",
                "\t\"router-0\" -- \"network-0\" [ ]",
                "\t\"router-0\" -- \"network-1\" [ ]",
            ]
        );
    }

    #[test]
    fn test_render_extra_without_color() {
        let topology = topology();
        let dot = render(topology.registry(), false, true);

        assert!(dot.contains(
            "\t\"router-0\" [ label=\"router-0\\n192.168.0.1\\ndhcp\" style=\"filled\" fillcolor=\"gainsboro\" ]\n"
        ));
        assert!(dot.contains("\t\"network-0\" [ label=\"network-0\\n192.168.0.0/24\" shape=box ]\n"));
        assert!(dot.contains("\t\"network-1\" [ shape=box ]\n"));
    }
}
