//! C sources for the programs baked into the rootfs.
//!
//! Both programs are compiled statically on the host, so every value they
//! need (the target argv, the interface addresses) is embedded as a string
//! literal rather than read at boot.

use std::fmt::Write as _;
use tinyvm_schema::NetworkConfig;

/// Interface the network bootstrap configures.
pub const NET_INTERFACE: &str = "eth0";
/// Path of the network bootstrap inside the VM.
pub const NETSETUP_PATH: &str = "/netsetup";

/// Quote `s` as a C string literal.
pub fn c_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for byte in s.bytes() {
        match byte {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(char::from(byte)),
            _ => {
                let _ = write!(out, "\\{byte:03o}");
            }
        }
    }
    out.push('"');
    out
}

const MOUNTS: &[(&str, &str, &str)] = &[
    ("proc", "/proc", "proc"),
    ("sysfs", "/sys", "sysfs"),
    ("devtmpfs", "/dev", "devtmpfs"),
];

/// Source of `/init`: mount the pseudo filesystems, optionally fork the
/// network bootstrap, then exec `argv`. If the exec fails init sleeps
/// forever so the kernel does not panic.
pub fn init_source(argv: &[String], include_net: bool) -> String {
    let mut src = String::from(
        "#include <stdio.h>\n\
         #include <stdlib.h>\n\
         #include <string.h>\n\
         #include <unistd.h>\n\
         #include <sys/mount.h>\n\
         #include <sys/types.h>\n",
    );
    if include_net {
        src.push_str(
            "#include <sys/socket.h>\n\
             #include <sys/ioctl.h>\n\
             #include <net/if.h>\n",
        );
    }
    src.push_str("\nint main(void) {\n");
    src.push_str("    printf(\"tinyvm init starting\\n\");\n    fflush(stdout);\n\n");

    for (source, target, fstype) in MOUNTS {
        let _ = write!(
            src,
            "    if (mount({s}, {t}, {f}, 0, NULL) != 0) {{\n        \
             perror(\"mount {target}\");\n        \
             return 1;\n    \
             }}\n",
            s = c_string(source),
            t = c_string(target),
            f = c_string(fstype),
        );
    }
    src.push_str("\n    setenv(\"TERM\", \"vt100\", 1);\n\n");

    if include_net {
        let _ = write!(
            src,
            "    int sock = socket(AF_INET, SOCK_DGRAM, 0);\n    \
             if (sock >= 0) {{\n        \
             struct ifreq ifr;\n        \
             memset(&ifr, 0, sizeof(ifr));\n        \
             strncpy(ifr.ifr_name, {iface}, IFNAMSIZ - 1);\n        \
             if (ioctl(sock, SIOCGIFFLAGS, &ifr) == 0) {{\n            \
             if (fork() == 0) {{\n                \
             execl({tool}, {tool}, (char *)NULL);\n                \
             perror(\"exec {NETSETUP_PATH}\");\n                \
             _exit(1);\n            \
             }}\n        \
             }} else {{\n            \
             perror(\"{NET_INTERFACE} not found\");\n        \
             }}\n        \
             close(sock);\n    \
             }} else {{\n        \
             perror(\"socket\");\n    \
             }}\n\n",
            iface = c_string(NET_INTERFACE),
            tool = c_string(NETSETUP_PATH),
        );
    }

    let args: Vec<String> = argv.iter().map(|a| c_string(a)).collect();
    let _ = write!(
        src,
        "    char *argv[] = {{{}, NULL}};\n    \
         execv(argv[0], argv);\n    \
         perror(\"execv\");\n    \
         while (1) {{\n        \
         sleep(1);\n    \
         }}\n    \
         return 0;\n\
         }}\n",
        args.join(", ")
    );
    src
}

/// Source of the network bootstrap: address, netmask, link up and a default
/// route through the gateway, all on [`NET_INTERFACE`].
pub fn netsetup_source(net: &NetworkConfig) -> String {
    let iface = c_string(NET_INTERFACE);
    let ip = c_string(&net.ip_address);
    let mask = c_string(&net.netmask);
    let gw = c_string(&net.gateway);
    format!(
        r#"#include <stdio.h>
#include <string.h>
#include <unistd.h>
#include <arpa/inet.h>
#include <netinet/in.h>
#include <net/if.h>
#include <sys/ioctl.h>
#include <sys/socket.h>
#include <linux/route.h>

int main(void) {{
    struct ifreq ifr;
    struct rtentry route;
    struct sockaddr_in *addr;
    int status = 0;

    int fd = socket(AF_INET, SOCK_DGRAM, 0);
    if (fd < 0) {{
        perror("socket");
        return 1;
    }}

    memset(&ifr, 0, sizeof(ifr));
    strncpy(ifr.ifr_name, {iface}, IFNAMSIZ - 1);
    addr = (struct sockaddr_in *)&ifr.ifr_addr;
    addr->sin_family = AF_INET;
    inet_pton(AF_INET, {ip}, &addr->sin_addr);
    if (ioctl(fd, SIOCSIFADDR, &ifr) < 0) {{
        perror("SIOCSIFADDR");
        status = 1;
    }}

    addr = (struct sockaddr_in *)&ifr.ifr_netmask;
    addr->sin_family = AF_INET;
    inet_pton(AF_INET, {mask}, &addr->sin_addr);
    if (ioctl(fd, SIOCSIFNETMASK, &ifr) < 0) {{
        perror("SIOCSIFNETMASK");
        status = 1;
    }}

    if (ioctl(fd, SIOCGIFFLAGS, &ifr) == 0) {{
        ifr.ifr_flags |= IFF_UP | IFF_RUNNING;
        if (ioctl(fd, SIOCSIFFLAGS, &ifr) < 0) {{
            perror("SIOCSIFFLAGS");
            status = 1;
        }}
    }}

    memset(&route, 0, sizeof(route));
    addr = (struct sockaddr_in *)&route.rt_dst;
    addr->sin_family = AF_INET;
    addr->sin_addr.s_addr = INADDR_ANY;
    addr = (struct sockaddr_in *)&route.rt_genmask;
    addr->sin_family = AF_INET;
    addr->sin_addr.s_addr = INADDR_ANY;
    addr = (struct sockaddr_in *)&route.rt_gateway;
    addr->sin_family = AF_INET;
    inet_pton(AF_INET, {gw}, &addr->sin_addr);
    route.rt_flags = RTF_UP | RTF_GATEWAY;
    route.rt_dev = {iface};
    if (ioctl(fd, SIOCADDRT, &route) < 0) {{
        perror("SIOCADDRT");
        status = 1;
    }}

    close(fd);
    return status;
}}
"#
    )
}
